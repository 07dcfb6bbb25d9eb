//! PDF sources, rasterized one page at a time with `mutool draw`.

use super::{MimeMatcher, Plugin};
use crate::backend::BackendResult;
use crate::backend::imagemagick::run;
use pigment_core::{Operation, Transformations};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tempfile::TempPath;
use tracing::debug;

const PAGE_LETTER: char = 'R';

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfPlugin;

impl PdfPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for PdfPlugin {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn mime_types(&self) -> Vec<MimeMatcher> {
        vec![MimeMatcher::exact("application/pdf")]
    }

    fn operations(&self) -> &'static [(&'static str, char)] {
        &[("page", PAGE_LETTER)]
    }

    fn transform(
        &self,
        source: &Path,
        plugin_ops: &[Operation],
        all: &Transformations,
    ) -> BackendResult<TempPath> {
        let output = tempfile::Builder::new()
            .prefix("pigment-pdf-")
            .suffix(".png")
            .tempfile()?
            .into_temp_path();

        let args = draw_args(source, &output, plugin_ops, all);
        debug!(?args, "running mutool");
        run("mutool", Command::new("mutool").args(&args))?;
        Ok(output)
    }
}

/// Page number from the plugin operations; the first page by default.
fn page(plugin_ops: &[Operation]) -> u32 {
    plugin_ops
        .iter()
        .find_map(|op| match op {
            Operation::Extension { letter, value } if *letter == PAGE_LETTER => {
                value.parse::<u32>().ok().filter(|p| *p > 0)
            }
            _ => None,
        })
        .unwrap_or(1)
}

pub(crate) fn draw_args(
    source: &Path,
    output: &Path,
    plugin_ops: &[Operation],
    all: &Transformations,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["draw".into()];
    // Render close to the requested size so the backend resize stays cheap.
    if let Some(size) = all.resize() {
        if let Some(height) = size.height {
            args.push("-h".into());
            args.push(height.to_string().into());
        }
        if let Some(width) = size.width {
            args.push("-w".into());
            args.push(width.to_string().into());
        }
    }
    args.push("-o".into());
    args.push(output.into());
    args.push(source.into());
    args.push(page(plugin_ops).to_string().into());
    args
}
