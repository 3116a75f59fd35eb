//! Command-line interface module
//!
//! This module contains the implementations for the CLI subcommands and the input
//! handling they share.

use crate::error::{Error, Result};
use crate::operation::Operation;
use serde::Deserialize;
use std::path::Path;

pub mod build;
pub mod check;

/// A body with the name used to select it on the command line
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NamedBody {
    pub name: String,
    pub body: Operation,
}

/// Contents of an input file: a list of named bodies, or one anonymous body
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputDocument {
    Bodies(Vec<NamedBody>),
    Single(Operation),
}

/// Parse an input document from JSON text
pub fn parse_bodies(json: &str) -> Result<Vec<NamedBody>> {
    let document: InputDocument = serde_json::from_str(json)?;
    Ok(match document {
        InputDocument::Bodies(bodies) => bodies,
        InputDocument::Single(body) => vec![NamedBody {
            name: "main".to_string(),
            body,
        }],
    })
}

/// Read and parse an input file, keeping only `function` when given
pub fn load_bodies(path: &Path, function: Option<&str>) -> Result<Vec<NamedBody>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    let bodies = parse_bodies(&text)?;
    log::debug!("Loaded {} bodies from {}", bodies.len(), path.display());

    match function {
        Some(name) => {
            let selected: Vec<_> = bodies.into_iter().filter(|body| body.name == name).collect();
            if selected.is_empty() {
                return Err(Error::BodyNotFound {
                    name: name.to_string(),
                });
            }
            Ok(selected)
        }
        None => Ok(bodies),
    }
}

/// Write output to file or stdout
pub fn write_output(content: &str, output_path: Option<&Path>) -> Result<()> {
    match output_path {
        Some(path) => std::fs::write(path, content).map_err(Error::from),
        None => {
            print!("{}", content);
            Ok(())
        }
    }
}
