use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tracing::info;
use vstore_commit::{CommitRequest, Committer, Persist};
use vstore_config::StoreConfig;
use vstore_refs::InMemoryRefStore;
use vstore_store::{InMemoryObjectStore, ObjectKind, ObjectStore, DEFAULT_HARD_OBJECT_SIZE_LIMIT};
use vstore_types::{key_codec, ObjectId, StoreKey};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Config(args) => cmd_config(args, cli.format),
        Command::Stress(args) => cmd_stress(args, cli.format),
        Command::Key(args) => cmd_key(args, cli.format),
    }
}

/// Defaults, then the TOML file, then `--set` overrides.
fn load_config(source: &ConfigSource) -> anyhow::Result<StoreConfig> {
    let mut config = StoreConfig::default();
    if let Some(path) = &source.file {
        config = config.with_pairs(read_toml_pairs(path)?)?;
    }
    let mut overrides = Vec::with_capacity(source.set.len());
    for assignment in &source.set {
        let Some((key, value)) = assignment.split_once('=') else {
            bail!("expected KEY=VALUE, got {assignment:?}");
        };
        overrides.push((key.trim().to_string(), value.to_string()));
    }
    Ok(config.with_pairs(overrides)?)
}

/// Top-level scalar entries of a TOML file as key→string pairs.
fn read_toml_pairs(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let table: toml::Table =
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    table
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => bail!("{key}: expected a string, integer or boolean, got {}", other.type_str()),
            };
            Ok((key, value))
        })
        .collect()
}

fn cmd_config(args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config(&args.source)?;
    config
        .validate(DEFAULT_HARD_OBJECT_SIZE_LIMIT)
        .context("configuration does not fit the default backend")?;

    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = config
                .to_pairs()
                .into_iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            for (key, value) in config.to_pairs() {
                let shown = if value.is_empty() {
                    "(empty)".dimmed().to_string()
                } else {
                    value.cyan().to_string()
                };
                println!("{:<36} {}", key.bold(), shown);
            }
            println!("{} configuration valid", "✓".green().bold());
        }
    }
    Ok(())
}

struct WriterReport {
    attempts: u64,
    max_attempts: u32,
    spills: usize,
}

fn cmd_stress(args: StressArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.writers == 0 || args.commits == 0 || args.keys_per_commit == 0 {
        bail!("--writers, --commits and --keys-per-commit must be positive");
    }
    let config = load_config(&args.source)?;
    let objects = InMemoryObjectStore::new().for_repository(config.repository_id.clone());
    let refs = InMemoryRefStore::new().for_repository(config.repository_id.clone());
    let persist = Persist::new(Arc::new(objects.clone()), Arc::new(refs), config)?;
    let committer = Committer::new(persist);
    committer.create_branch(&args.branch, ObjectId::EMPTY_ROOT)?;

    let started = Instant::now();
    let reports = thread::scope(|scope| {
        let handles: Vec<_> = (0..args.writers)
            .map(|writer| {
                let committer = &committer;
                let args = &args;
                scope.spawn(move || run_writer(committer, args, writer))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(report) => report,
                Err(_) => bail!("writer thread panicked"),
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })?;
    let elapsed = started.elapsed();

    // Every key of every writer must be visible at the final head.
    let head = committer.head(&args.branch)?;
    let entries = committer.entries(&head)?;
    let expected_keys = args.writers * args.commits * args.keys_per_commit;
    if entries.len() != expected_keys {
        bail!(
            "head {} holds {} keys, expected {expected_keys}",
            head.short_hex(),
            entries.len()
        );
    }
    let per_writer = args.commits * args.keys_per_commit;
    for writer in 0..args.writers {
        let prefix = StoreKey::new(["stress".to_string(), format!("w{writer}")])?;
        let found = committer.entries_under(&head, &prefix)?.len();
        if found != per_writer {
            bail!("writer {writer} has {found} keys at head, expected {per_writer}");
        }
    }
    let head_commit = committer.commit_obj(&head)?;
    let expected_commits = u64::try_from(args.writers * args.commits)?;
    if head_commit.seq != expected_commits {
        bail!(
            "head {} is commit #{}, expected #{expected_commits}",
            head.short_hex(),
            head_commit.seq
        );
    }
    let stripes = committer.persist().stripes(&head_commit.reference_index)?.len();

    let attempts: u64 = reports.iter().map(|r| r.attempts).sum();
    let max_attempts = reports.iter().map(|r| r.max_attempts).max().unwrap_or(0);
    let spills: usize = reports.iter().map(|r| r.spills).sum();
    info!(head = %head.short_hex(), commits = expected_commits, "stress run complete");

    match format {
        OutputFormat::Json => {
            let report = json!({
                "branch": args.branch,
                "head": head.to_hex(),
                "writers": args.writers,
                "commits": expected_commits,
                "keys": expected_keys,
                "attempts": attempts,
                "max_attempts": max_attempts,
                "spills": spills,
                "stripes": stripes,
                "incremental_entries": head_commit.incremental_index.len(),
                "objects": {
                    "commits": objects.count_kind(ObjectKind::Commit),
                    "index": objects.count_kind(ObjectKind::Index),
                    "index_segments": objects.count_kind(ObjectKind::IndexSegments),
                    "bytes": objects.total_bytes(),
                },
                "elapsed_millis": u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!(
                "{} {} commits from {} writers on {}",
                "✓".green().bold(),
                expected_commits.to_string().bold(),
                args.writers,
                args.branch.yellow()
            );
            println!("  Head:        {}", head.short_hex().yellow());
            println!("  Keys:        {expected_keys}");
            println!(
                "  Attempts:    {attempts} (max {max_attempts} for one commit)"
            );
            println!("  Spills:      {spills}");
            println!(
                "  Stripes:     {stripes}, {} incremental entries at head",
                head_commit.incremental_index.len()
            );
            println!(
                "  Objects:     {} commits, {} stripes, {} stripe lists, {} bytes",
                objects.count_kind(ObjectKind::Commit),
                objects.count_kind(ObjectKind::Index),
                objects.count_kind(ObjectKind::IndexSegments),
                objects.total_bytes()
            );
            println!("  Elapsed:     {:.2?}", elapsed);
            println!("  Repository:  {:?}", objects.repository_id());
        }
    }
    Ok(())
}

fn run_writer(
    committer: &Committer,
    args: &StressArgs,
    writer: usize,
) -> anyhow::Result<WriterReport> {
    let mut report = WriterReport {
        attempts: 0,
        max_attempts: 0,
        spills: 0,
    };
    for commit in 0..args.commits {
        let mut request = CommitRequest::new(args.branch.clone())
            .with_message(format!("writer {writer} commit {commit}"));
        for k in 0..args.keys_per_commit {
            let key = StoreKey::new([
                "stress".to_string(),
                format!("w{writer}"),
                format!("c{commit}k{k}"),
            ])?;
            let value = ObjectId::digest(format!("{writer}/{commit}/{k}").as_bytes());
            request = request.put(key, value);
        }
        let outcome = committer
            .commit(request)
            .with_context(|| format!("writer {writer}, commit {commit}"))?;
        report.attempts += u64::from(outcome.attempts);
        report.max_attempts = report.max_attempts.max(outcome.attempts);
        report.spills += usize::from(outcome.spilled);
    }
    Ok(report)
}

fn cmd_key(args: KeyArgs, format: OutputFormat) -> anyhow::Result<()> {
    match args.action {
        KeyAction::Encode { segments } => {
            let key = StoreKey::new(segments.iter().cloned())?;
            let encoded = key_codec::encode(&segments);
            let parent = key.parent().map(|p| p.to_path_string());
            match format {
                OutputFormat::Json => println!(
                    "{}",
                    json!({ "encoded": encoded, "name": key.name(), "parent": parent })
                ),
                OutputFormat::Text => {
                    println!("{}", encoded.escape_debug());
                    if let Some(parent) = parent {
                        println!("  {} {}", "parent:".dimmed(), parent.escape_debug());
                    }
                }
            }
        }
        KeyAction::Decode { encoded } => {
            let segments = key_codec::decode(&encoded);
            match format {
                OutputFormat::Json => println!("{}", json!({ "segments": segments })),
                OutputFormat::Text => {
                    for (i, segment) in segments.iter().enumerate() {
                        println!("{:>3}  {}", i.to_string().dimmed(), segment);
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source(set: &[&str]) -> ConfigSource {
        ConfigSource {
            file: None,
            set: set.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn set_overrides_defaults() {
        let config = load_config(&source(&["commit-retries=3", "repository-id = r1"])).unwrap();
        assert_eq!(config.commit_retries, 3);
        assert_eq!(config.repository_id, "r1");
    }

    #[test]
    fn set_requires_assignment() {
        assert!(load_config(&source(&["commit-retries"])).is_err());
        assert!(load_config(&source(&["no-such-key=1"])).is_err());
    }

    #[test]
    fn toml_file_is_flattened_then_overridden() {
        let path = std::env::temp_dir().join(format!("vstore-cli-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "parents-per-commit = 7").unwrap();
        writeln!(file, "namespace-validation = false").unwrap();
        writeln!(file, "repository-id = \"from-file\"").unwrap();
        drop(file);

        let config = load_config(&ConfigSource {
            file: Some(path.clone()),
            set: vec!["repository-id=from-flag".into()],
        })
        .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.parents_per_commit, 7);
        assert!(!config.validate_namespaces);
        assert_eq!(config.repository_id, "from-flag");
    }

    #[test]
    fn key_encode_validates_segments() {
        let encode = |segments: &[&str]| {
            cmd_key(
                KeyArgs {
                    action: KeyAction::Encode {
                        segments: segments.iter().map(|s| s.to_string()).collect(),
                    },
                },
                OutputFormat::Json,
            )
        };
        assert!(encode(&["ns", "table.v1"]).is_ok());
        assert!(encode(&["ns", ""]).is_err());
    }

    #[test]
    fn stress_run_completes() {
        let args = StressArgs {
            writers: 3,
            commits: 20,
            keys_per_commit: 2,
            branch: "main".into(),
            source: source(&[
                "max-incremental-index-size=1024",
                "max-serialized-index-size=2048",
                "retry-initial-sleep-millis-lower=0",
                "retry-initial-sleep-millis-upper=1",
                "retry-max-sleep-millis=2",
                "commit-timeout-millis=60000",
            ]),
        };
        cmd_stress(args, OutputFormat::Json).unwrap();
    }
}
