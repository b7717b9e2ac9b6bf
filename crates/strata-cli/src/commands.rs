use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde_json::json;
use strata_archive::{ArchiveReader, BinaryHeader, JsonArchiveReader, ObjectStamp};
use strata_store::{DatabaseConfig, NameTable, ObjectDatabase, Serializable, TypeRegistry};
use strata_types::{names, NameHash, TypeHash};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Hash(args) => cmd_hash(args, &cli.format),
        Command::Header(args) => cmd_header(args, &cli.format),
        Command::List(args) => cmd_list(args, &cli.format),
        Command::Convert(args) => cmd_convert(args),
    }
}

fn cmd_hash(args: HashArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let hashes: Vec<(NameHash, &str)> = args
        .names
        .iter()
        .map(|name| (NameHash::new(name), name.as_str()))
        .collect();
    match format {
        OutputFormat::Text => {
            for (hash, name) in &hashes {
                println!("{}  {}", hash.to_hex().yellow(), name);
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = hashes
                .iter()
                .map(|(hash, name)| {
                    json!({ "name": name, "hash": hash.raw(), "hex": hash.to_hex() })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

fn cmd_header(args: HeaderArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let header = read_header(&args.file)?;
    match format {
        OutputFormat::Text => {
            println!("{} {}", "✓".green().bold(), args.file.display().to_string().bold());
            println!("  Magic:   {:#010x}", header.magic);
            println!("  Version: {}", header.version);
            println!("  Objects: {}", header.object_count.to_string().cyan());
        }
        OutputFormat::Json => {
            let value = json!({
                "magic": header.magic,
                "version": header.version,
                "object_count": header.object_count,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

fn cmd_list(args: ListArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let stamps = list_records(&args.file)?;
    let type_names = builtin_type_names();
    let type_name = |hash: TypeHash| {
        type_names
            .iter()
            .find(|(known, _)| *known == hash)
            .map(|(_, name)| (*name).to_owned())
            .unwrap_or_else(|| hash.to_hex())
    };
    match format {
        OutputFormat::Text => {
            for stamp in &stamps {
                println!(
                    "{}  {}  {}",
                    stamp.name_hash.to_hex().yellow(),
                    names::describe(stamp.name_hash).bold(),
                    type_name(stamp.type_hash).dimmed()
                );
            }
            println!("{} records", stamps.len());
        }
        OutputFormat::Json => {
            let entries: Vec<_> = stamps
                .iter()
                .map(|stamp| {
                    json!({
                        "name_hash": stamp.name_hash.raw(),
                        "name": names::lookup(stamp.name_hash),
                        "type_hash": stamp.type_hash.raw(),
                        "type": type_name(stamp.type_hash),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

fn cmd_convert(args: ConvertArgs) -> anyhow::Result<()> {
    let config = DatabaseConfig {
        write_name_table: !args.no_names,
        ..DatabaseConfig::default()
    };
    let report = convert(&args.input, &args.output, config)?;
    println!(
        "{} Wrote {} objects to {}",
        "✓".green().bold(),
        report.objects.to_string().bold(),
        args.output.display()
    );
    Ok(())
}

fn read_header(path: &Path) -> anyhow::Result<BinaryHeader> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let header = BinaryHeader::read_from(&mut BufReader::new(file))
        .with_context(|| format!("{} is not a binary archive", path.display()))?;
    Ok(header)
}

/// Record stamps of a structured archive, with names from its name table
/// registered.
fn list_records(path: &Path) -> anyhow::Result<Vec<ObjectStamp>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let base_directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut reader = JsonArchiveReader::new(BufReader::new(file), base_directory)
        .with_context(|| format!("{} is not a structured archive", path.display()))?;
    let mut stamps = Vec::new();
    while let Some(stamp) = reader.next_object()? {
        if stamp.type_hash == NameTable::TYPE_HASH {
            let table = NameTable::read_from(&mut reader)?;
            debug!(names = table.len(), "name table read");
            continue;
        }
        stamps.push(stamp);
    }
    Ok(stamps)
}

fn builtin_type_names() -> Vec<(TypeHash, &'static str)> {
    TypeRegistry::with_builtins()
        .iter()
        .map(|(hash, registration)| (hash, registration.type_name))
        .collect()
}

fn convert(
    input: &Path,
    output: &Path,
    config: DatabaseConfig,
) -> anyhow::Result<strata_store::SaveReport> {
    let db = ObjectDatabase::with_config(Arc::new(TypeRegistry::with_builtins()), config);
    let record = db
        .load_file(input)
        .with_context(|| format!("loading {}", input.display()))?;
    let report = db
        .save_file(output, Some(&record))
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(report)
}
