use crate::cfg::{self, DotOptions};
use crate::cli::{load_bodies, write_output, NamedBody};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::operation::AnnotatedConstants;
use crate::options::BuildOptions;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

/// Rendering of built graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Dot,
}

#[derive(Debug, Clone)]
pub struct BuildArgs {
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub format: OutputFormat,
    pub function: Option<String>,
    pub options: BuildOptions,
}

#[derive(Serialize)]
struct BodyReport<'r, 'a> {
    name: &'r str,
    graph: &'r cfg::ControlFlowGraph<'a>,
    diagnostics: &'r Diagnostics,
}

/// One rendered body and what the builder reported for it
#[derive(Debug)]
pub struct RenderedBody {
    pub name: String,
    pub output: String,
    pub diagnostics: Diagnostics,
}

/// Build and render every body; bodies are independent and built in parallel
pub fn render_bodies(
    bodies: &[NamedBody],
    format: OutputFormat,
    options: &BuildOptions,
) -> Result<Vec<RenderedBody>> {
    bodies
        .par_iter()
        .map(|named| render_body(named, format, options))
        .collect()
}

fn render_body(named: &NamedBody, format: OutputFormat, options: &BuildOptions) -> Result<RenderedBody> {
    let mut diagnostics = Diagnostics::new();
    let graph = cfg::build(&named.body, &AnnotatedConstants, options, &mut diagnostics)?;

    let output = match format {
        OutputFormat::Text => graph.to_text(),
        OutputFormat::Dot => graph.to_dot(&DotOptions::default()),
        OutputFormat::Json => serde_json::to_string_pretty(&BodyReport {
            name: &named.name,
            graph: &graph,
            diagnostics: &diagnostics,
        })?,
    };

    Ok(RenderedBody {
        name: named.name.clone(),
        output,
        diagnostics,
    })
}

/// Report diagnostics on stderr, one line each
pub fn print_diagnostics(name: &str, diagnostics: &Diagnostics) {
    for diagnostic in diagnostics.iter() {
        let level = if diagnostic.is_error() { "error" } else { "warning" };
        eprintln!("{}: {}: {}", name, level, diagnostic);
    }
}

pub fn build(args: &BuildArgs) -> Result<()> {
    let bodies = load_bodies(&args.input_path, args.function.as_deref())?;
    let rendered = render_bodies(&bodies, args.format, &args.options)?;

    let mut content = String::new();
    match args.format {
        OutputFormat::Json => {
            let reports: Vec<&str> = rendered.iter().map(|body| body.output.as_str()).collect();
            let _ = writeln!(content, "[{}]", reports.join(",\n"));
        }
        OutputFormat::Text | OutputFormat::Dot => {
            for body in &rendered {
                if rendered.len() > 1 {
                    let _ = writeln!(content, "// {}", body.name);
                }
                content.push_str(&body.output);
            }
        }
    }

    for body in &rendered {
        print_diagnostics(&body.name, &body.diagnostics);
    }
    write_output(&content, args.output_path.as_deref())
}
