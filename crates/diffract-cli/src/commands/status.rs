//! Status command - summarize a saved experiment.

use std::path::PathBuf;

use colored::Colorize;
use diffract::Experiment;

pub fn run(archive: PathBuf, json_output: bool, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !archive.exists() {
        return Err(format!(
            "Archive not found: {}\nRun 'diffract run --name <name>' first.",
            archive.display()
        )
        .into());
    }

    let exp = Experiment::load(&archive)?;
    let history = Experiment::list_history(&archive)?;

    if json_output {
        let collections: Vec<_> = exp
            .collections()
            .map(|c| {
                serde_json::json!({
                    "name": c.name,
                    "kind": c.kind,
                    "peaks": c.len(),
                    "valid": c.number_valid(),
                    "caught": c.number_caught(),
                    "indexed": c.number_indexed(),
                    "cell": c.assigned_cell(),
                })
            })
            .collect();
        let cells: serde_json::Map<String, serde_json::Value> = exp
            .cell_tags()
            .into_iter()
            .filter_map(|tag| {
                exp.cell(tag)
                    .ok()
                    .map(|cell| (tag.to_string(), serde_json::json!(cell.to_string())))
            })
            .collect();

        let status = serde_json::json!({
            "name": exp.name,
            "format_version": exp.format_version,
            "created_at": exp.created_at.to_rfc3339(),
            "updated_at": exp.updated_at.to_rfc3339(),
            "datasets": exp.dataset_names(),
            "collections": collections,
            "cells": cells,
            "batches": exp.batches().len(),
            "quality": exp.quality().map(|q| &q.overall),
            "metadata": exp.metadata(),
            "history": history.len(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "Experiment".cyan().bold(),
        exp.name.white().bold()
    );
    println!(
        "  Created {}  Updated {}  ({} history snapshots)",
        exp.created_at.format("%Y-%m-%d %H:%M:%S"),
        exp.updated_at.format("%Y-%m-%d %H:%M:%S"),
        history.len()
    );
    println!();

    println!("{}", "Datasets:".yellow().bold());
    for name in exp.dataset_names() {
        let ds = exp.dataset(name)?;
        println!(
            "  {:12} {} frames, {} ({:.2} Å)",
            name,
            ds.n_frames(),
            ds.detector,
            ds.wavelength
        );
    }
    println!();

    println!("{}", "Collections:".yellow().bold());
    for c in exp.collections() {
        println!(
            "  {:16} {:10} {:7} peaks  {:7} valid  {:7} indexed  {}",
            c.name,
            c.kind.to_string(),
            c.len(),
            c.number_valid(),
            c.number_indexed(),
            c.assigned_cell().unwrap_or("-")
        );
    }
    println!();

    println!("{}", "Cells:".yellow().bold());
    for tag in exp.cell_tags() {
        println!("  {:10} {}", tag, exp.cell(tag)?);
    }

    if !exp.batches().is_empty() {
        println!();
        println!("{}", "Refinement batches:".yellow().bold());
        for batch in exp.batches() {
            let status = if batch.refined {
                "refined".green()
            } else {
                "unrefined".red()
            };
            println!(
                "  {:3} frames {:10} {:6} peaks  {}",
                batch.index,
                batch.frames.to_string(),
                batch.n_peaks,
                status
            );
        }
    }

    if let Some(quality) = exp.quality() {
        println!();
        println!("{}", "Merging statistics:".yellow().bold());
        if verbose {
            print!("{}", quality.to_table());
        } else {
            let overall = &quality.overall;
            let completeness = format!("{:.1}%", overall.completeness * 100.0);
            let colored_completeness = if overall.completeness >= 0.9 {
                completeness.green()
            } else if overall.completeness >= 0.5 {
                completeness.yellow()
            } else {
                completeness.red()
            };
            println!(
                "  Completeness {}  Rmerge {:.3}  CC1/2 {:.3}  ({} observations, {} unique)",
                colored_completeness,
                overall.r_merge,
                overall.cc_half,
                overall.n_peaks,
                overall.n_unique
            );
        }
    }

    if verbose && !exp.metadata().is_empty() {
        println!();
        println!("{}", "Metadata:".yellow().bold());
        for (key, value) in exp.metadata() {
            println!("  {:16} {}", key, value);
        }
    }

    Ok(())
}
