//! Tokenizer for transform strings.
//!
//! A transform string is a run of tokens, each one uppercase ASCII letter
//! followed by a (possibly empty) value of non-uppercase characters.

/// One letter plus its raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub letter: char,
    pub value: &'a str,
}

/// Iterator over the tokens of a transform string. Characters before the
/// first uppercase letter are skipped.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    rest: &'a str,
}

/// Tokenize a transform string.
pub fn tokenize(s: &str) -> Tokens<'_> {
    let start = s.find(|c: char| c.is_ascii_uppercase()).unwrap_or(s.len());
    Tokens { rest: &s[start..] }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chars = self.rest.chars();
        let letter = chars.next()?;
        let tail = chars.as_str();
        let end = tail
            .find(|c: char| c.is_ascii_uppercase())
            .unwrap_or(tail.len());
        let (value, rest) = tail.split_at(end);
        self.rest = rest;
        Some(Token { letter, value })
    }
}

/// Split a leading `<letter><value>` token off `s`, if present and non-empty.
pub fn strip_leading(s: &str, letter: char) -> Option<(&str, &str)> {
    let token = tokenize(s).next()?;
    if !s.starts_with(letter) || token.letter != letter || token.value.is_empty() {
        return None;
    }
    Some((token.value, &s[letter.len_utf8() + token.value.len()..]))
}

/// Remove every token with the given letter.
pub fn remove_letter(s: &str, letter: char) -> String {
    let mut out = String::with_capacity(s.len());
    let prefix = s.find(|c: char| c.is_ascii_uppercase()).unwrap_or(s.len());
    out.push_str(&s[..prefix]);
    for token in tokenize(s).filter(|t| t.letter != letter) {
        out.push(token.letter);
        out.push_str(token.value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(s: &str) -> Vec<(char, &str)> {
        tokenize(s).map(|t| (t.letter, t.value)).collect()
    }

    #[test]
    fn test_tokenize_mixed_values() {
        assert_eq!(
            pairs("S500x500^GW0seP1,2,3,4weeddccaaILOT"),
            vec![
                ('S', "500x500^"),
                ('G', ""),
                ('W', "0se"),
                ('P', "1,2,3,4weeddccaa"),
                ('I', ""),
                ('L', ""),
                ('O', ""),
                ('T', ""),
            ]
        );
    }

    #[test]
    fn test_tokenize_empty_and_leading_garbage() {
        assert!(pairs("").is_empty());
        assert_eq!(pairs("xyG"), vec![('G', "")]);
    }

    #[test]
    fn test_strip_leading() {
        assert_eq!(
            strip_leading("Habc123S100x100", 'H'),
            Some(("abc123", "S100x100"))
        );
        assert_eq!(strip_leading("E5f000000", 'E'), Some(("5f000000", "")));
        assert_eq!(strip_leading("S100x100Eab", 'E'), None);
        assert_eq!(strip_leading("HS100", 'H'), None);
    }

    #[test]
    fn test_remove_letter() {
        assert_eq!(remove_letter("S100x100Baabbcc", 'S'), "Baabbcc");
        assert_eq!(remove_letter("BaabbccS100x100I", 'S'), "BaabbccI");
        assert_eq!(remove_letter("SaSbG", 'S'), "G");
    }
}
