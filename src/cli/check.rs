use crate::cli::build::{print_diagnostics, render_bodies, OutputFormat};
use crate::cli::load_bodies;
use crate::error::{Error, Result};
use crate::options::BuildOptions;
use std::path::Path;

/// Build every body and report diagnostics only; fails when any body has an error
pub fn check(input_path: &Path, options: &BuildOptions) -> Result<()> {
    let bodies = load_bodies(input_path, None)?;
    let rendered = render_bodies(&bodies, OutputFormat::Text, options)?;

    let mut errors = 0;
    for body in &rendered {
        print_diagnostics(&body.name, &body.diagnostics);
        errors += body.diagnostics.errors().count();
    }
    println!("Checked {} bodies: {} errors", rendered.len(), errors);

    if errors > 0 {
        return Err(Error::invalid_input(format!(
            "{} error(s) in {}",
            errors,
            input_path.display()
        )));
    }
    Ok(())
}
