//! Command-line interface to sweeplab notebooks
//!
//! Inspect, copy, remove, and select result sets in on-disk notebooks:
//!
//! ```bash
//! sweeplab show runs.json
//! sweeplab copy runs.json:sweep=sweep-v1 archive.json
//! sweeplab remove runs.json:scratch
//! sweeplab select runs.json:sweep-v1
//! ```
//!
//! Exits 0 on success and 1 on any error, with diagnostics on stderr.

mod spec;

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use sweeplab_store::{JsonBackend, Notebook, DEFAULT_RESULTSET};

use crate::spec::{parse_spec, parse_target};

#[derive(Parser)]
#[command(name = "sweeplab", version, about = "Manage sweeplab notebooks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the structure of a notebook
    Show {
        /// Notebook file to inspect
        notebook: String,

        /// Human-readable summary (the default)
        #[arg(short, long, conflicts_with = "short")]
        long: bool,

        /// One result set tag per line, for feeding to other commands
        #[arg(short, long)]
        short: bool,
    },

    /// Copy result sets into a destination notebook
    Copy {
        /// Result sets as [NOTEBOOK]:TAG[=NEWTAG], then the destination
        /// notebook; an omitted NOTEBOOK reuses the previous one
        #[arg(required = true, num_args = 2..)]
        args: Vec<String>,

        /// Report each result set as it is copied
        #[arg(short, long)]
        verbose: bool,

        /// Validate and report without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Delete result sets from their notebooks
    Remove {
        /// Result sets as [NOTEBOOK]:TAG; an omitted NOTEBOOK reuses
        /// the previous one
        #[arg(required = true, num_args = 1..)]
        specs: Vec<String>,

        /// Report each result set as it is removed
        #[arg(short, long)]
        verbose: bool,

        /// Validate and report without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Print or change a notebook's current result set
    Select {
        /// NOTEBOOK to query, or NOTEBOOK:TAG to make TAG current
        target: String,

        /// Report the selection change
        #[arg(short, long)]
        verbose: bool,

        /// Validate and report without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        eprintln!("sweeplab: {err:#}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Show {
            notebook,
            long: _,
            short,
        } => show(&notebook, short),
        Command::Copy {
            args,
            verbose,
            dry_run,
        } => copy(args, verbose, dry_run),
        Command::Remove {
            specs,
            verbose,
            dry_run,
        } => remove(&specs, verbose, dry_run),
        Command::Select {
            target,
            verbose,
            dry_run,
        } => select(&target, verbose, dry_run),
    }
}

/// Open a notebook that must already exist.
fn open_existing(path: &str) -> Result<Notebook> {
    if !Path::new(path).is_file() {
        bail!("can't open {path}: no such notebook");
    }
    JsonBackend::open(path, None).with_context(|| format!("can't open {path}"))
}

fn show(notebook: &str, short: bool) -> Result<()> {
    let nb = open_existing(notebook)?;
    if short {
        for tag in nb.result_sets() {
            println!("{tag}");
        }
        return Ok(());
    }

    let locked = if nb.is_locked() { " (locked)" } else { "" };
    println!("{}{locked}", nb.description());
    println!();
    println!("Result sets:");
    for tag in nb.result_sets() {
        let rs = nb.result_set(&tag)?;
        let marker = if tag == nb.current_tag() { "*" } else { " " };
        let locked = if rs.is_locked() { ", locked" } else { "" };
        println!(
            "  {marker} {tag}: {} ({} results, {} pending{locked})",
            rs.description(),
            rs.number_of_results(),
            rs.number_of_pending_results(),
        );
    }
    Ok(())
}

fn copy(mut args: Vec<String>, verbose: bool, dry_run: bool) -> Result<()> {
    let dest = args.pop().expect("clap enforces two arguments");
    let mut dest_nb =
        JsonBackend::open(&dest, None).with_context(|| format!("can't open {dest}"))?;
    if dest_nb.is_locked() {
        bail!("destination notebook {dest} is locked");
    }

    let mut source_path: Option<String> = None;
    let mut source_nb: Option<Notebook> = None;
    for raw in &args {
        let spec = parse_spec(raw)?;
        if let Some(nb) = spec.notebook.clone() {
            if source_path.as_deref() != Some(nb.as_str()) {
                source_nb = None;
            }
            source_path = Some(nb);
        }
        let path = source_path
            .clone()
            .with_context(|| format!("no notebook for result set specifier '{raw}'"))?;
        if source_nb.is_none() {
            source_nb = Some(open_existing(&path)?);
        }
        let src = source_nb.as_ref().expect("just opened");

        if !src.contains(&spec.tag) {
            bail!("no result set '{}' in {path}", spec.tag);
        }
        let target = spec.target_tag();
        if dest_nb.contains(target) {
            bail!("result set '{target}' already exists in {dest}");
        }

        copy_set(src, &spec.tag, &mut dest_nb, target, verbose, dry_run)?;
    }

    if !dry_run {
        dest_nb.commit()?;
    }
    Ok(())
}

fn copy_set(
    src: &Notebook,
    tag: &str,
    dest: &mut Notebook,
    target: &str,
    verbose: bool,
    dry_run: bool,
) -> Result<()> {
    let rs = src.result_set(tag)?;
    let records = rs.results();
    if dry_run {
        println!("would copy '{tag}' as '{target}' ({} results)", records.len());
        return Ok(());
    }

    {
        let copied = dest.add_result_set(target, Some(rs.description()))?;
        for (key, value) in rs.attributes() {
            copied.set_attribute(key, value.clone())?;
        }
    }

    let bar = verbose.then(|| {
        let bar = ProgressBar::new(records.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} {bar:40.cyan/blue} {pos}/{len}")
                .expect("static template"),
        );
        bar.set_message(format!("{tag} -> {target}"));
        bar
    });
    for rc in records {
        dest.add_result(rc, Some(target))?;
        if let Some(bar) = &bar {
            bar.inc(1);
        }
    }
    if let Some(bar) = &bar {
        bar.finish();
    }
    Ok(())
}

fn remove(specs: &[String], verbose: bool, dry_run: bool) -> Result<()> {
    let mut open: Option<(String, Notebook)> = None;
    for raw in specs {
        let spec = parse_spec(raw)?;
        if spec.rename.is_some() {
            bail!("result set specifier '{raw}' can't rename on removal");
        }

        let path = match (&spec.notebook, &open) {
            (Some(path), _) => path.clone(),
            (None, Some((path, _))) => path.clone(),
            (None, None) => bail!("no notebook for result set specifier '{raw}'"),
        };

        // moving on to a different notebook commits the previous one
        if let Some((previous, nb)) = open.take() {
            if previous == path {
                open = Some((previous, nb));
            } else {
                finish_notebook(nb, dry_run)?;
            }
        }
        if open.is_none() {
            open = Some((path.clone(), open_existing(&path)?));
        }
        let (_, nb) = open.as_mut().expect("notebook just opened");

        if !nb.contains(&spec.tag) {
            bail!("no result set '{}' in {path}", spec.tag);
        }
        if dry_run {
            println!("would remove '{}' from {path}", spec.tag);
            continue;
        }
        if nb.current_tag() == spec.tag && spec.tag != DEFAULT_RESULTSET {
            nb.select(DEFAULT_RESULTSET)?;
        }
        nb.delete_result_set(&spec.tag)
            .with_context(|| format!("can't remove '{}' from {path}", spec.tag))?;
        if verbose {
            println!("removed '{}' from {path}", spec.tag);
        }
    }

    if let Some((_, nb)) = open.take() {
        finish_notebook(nb, dry_run)?;
    }
    Ok(())
}

fn finish_notebook(mut nb: Notebook, dry_run: bool) -> Result<()> {
    if !dry_run {
        nb.commit()?;
    }
    Ok(())
}

fn select(target: &str, verbose: bool, dry_run: bool) -> Result<()> {
    let (path, tag) = parse_target(target)?;
    let mut nb = open_existing(&path)?;
    match tag {
        None => println!("{}", nb.current_tag()),
        Some(tag) => {
            if !nb.contains(&tag) {
                bail!("no result set '{tag}' in {path}");
            }
            if dry_run {
                println!("would select '{tag}' in {path}");
                return Ok(());
            }
            nb.select(&tag)?;
            nb.commit()?;
            if verbose {
                println!("selected '{tag}' in {path}");
            }
        }
    }
    Ok(())
}
