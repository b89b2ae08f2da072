use std::fs;
use std::future::Future;
use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use crossterm::style::Stylize;
use tokio::sync::watch;
use tracing::warn;

use crate::chart::{self, Source};
use crate::config;
use crate::enrich::{Enricher, OnImageMeasured};
use crate::progress::Spinner;
use crate::runtime::docker::DockerConnector;
use crate::scanner::{self, ImageRecord, Metadata};

pub async fn run(source: Source) -> Result<()> {
    let cfg = config::get();

    let spinner = if cfg.json.is_some() {
        Spinner::hidden()
    } else {
        Spinner::new(format!("Fetching {} ...", describe(&source)))
    };

    let chart = chart::acquire(&source, &cfg.helm)
        .await
        .context("Could not scan chart")?;

    let cancel = watch_interrupt();
    let enricher = Enricher::new(cfg.jobs, cancel);

    spinner.set_message("Scanning chart for images ...");
    let bar = spinner.clone_bar();
    let on_measured: OnImageMeasured =
        Box::new(move |record: &ImageRecord, done: usize, total: usize| {
            bar.set_message(format!("Measuring images {done}/{total} ({})", record.name));
        });

    let mut records = scanner::scan(chart.root(), &enricher, &DockerConnector, Some(on_measured))
        .await
        .context("Could not scan chart")?;
    drop(chart);

    let interrupted = enricher.is_cancelled();
    let partial = records.iter().filter(|r| !r.is_available()).count();
    let summary = summarize(records.len(), partial);
    if partial > 0 || interrupted {
        spinner.warn(summary);
    } else {
        spinner.finish(summary);
    }

    records.sort_by(|a, b| a.name.cmp(&b.name));
    if let Some(dest) = &cfg.json {
        write_json(&records, dest)?;
    } else {
        print_listing(&mut io::stdout().lock(), &records)?;
    }

    if interrupted {
        bail!("Scan interrupted; results are incomplete");
    }
    Ok(())
}

/// Raise the cancel flag on Ctrl-C so in-flight pulls are cleaned up.
/// A second Ctrl-C exits at once.
fn watch_interrupt() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(relay_interrupts(tokio::signal::ctrl_c, tx, || {
        std::process::exit(130);
    }));
    rx
}

async fn relay_interrupts<F, Fut>(
    mut next_interrupt: F,
    cancel: watch::Sender<bool>,
    force_exit: impl FnOnce(),
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return;
    }
    warn!("interrupted, removing images pulled so far (Ctrl-C again to quit now)");
    let _ = cancel.send(true);

    if next_interrupt().await.is_ok() {
        warn!("interrupted again, exiting without cleanup");
        force_exit();
    }
}

fn describe(source: &Source) -> String {
    match source {
        Source::File(path) => path.display().to_string(),
        Source::Link(link) => link.clone(),
        Source::Repo {
            repo,
            chart,
            version: Some(v),
        } => format!("{repo}/{chart} {v}"),
        Source::Repo { repo, chart, .. } => format!("{repo}/{chart}"),
    }
}

fn summarize(found: usize, partial: usize) -> String {
    match (found, partial) {
        (0, _) => "No images found".to_string(),
        (n, 0) => format!("{n} images found"),
        (n, p) => format!("{n} images found, {p} with partial metadata"),
    }
}

fn write_json(records: &[ImageRecord], dest: &str) -> Result<()> {
    let legacy: Vec<_> = records.iter().map(ImageRecord::legacy).collect();
    let output = serde_json::to_string_pretty(&legacy)?;
    if dest == "-" {
        println!("{output}");
    } else {
        fs::write(dest, &output).with_context(|| format!("Failed to write JSON to {dest}"))?;
        eprintln!("{} Wrote {dest}", "✔".green());
    }
    Ok(())
}

fn print_listing(out: &mut impl Write, records: &[ImageRecord]) -> Result<()> {
    for (i, record) in records.iter().enumerate() {
        writeln!(out, "{}. Image scanned:", i + 1)?;
        writeln!(out, "   Image:  {}", record.name)?;
        writeln!(out, "   Size:   {}", record.size_display())?;
        writeln!(out, "   Layers: {}", record.layers_display())?;
        if let Metadata::Unavailable { reason } = &record.metadata {
            writeln!(out, "   Error:  {reason}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};

    fn interrupts(
        results: Vec<io::Result<()>>,
    ) -> impl FnMut() -> std::future::Ready<io::Result<()>> {
        let mut results = results.into_iter();
        move || std::future::ready(results.next().unwrap_or_else(|| Err(io::Error::other("done"))))
    }

    #[test]
    fn listing_numbers_images_and_shows_failures() {
        let records = vec![
            ImageRecord {
                name: "bitnami/redis".into(),
                reference: "bitnami/redis:7.2".into(),
                metadata: Metadata::Available {
                    size_bytes: 56_842_240,
                    layers: 5,
                },
            },
            ImageRecord {
                name: "ghost".into(),
                reference: "ghost:1".into(),
                metadata: Metadata::Unavailable {
                    reason: "failed to pull ghost:1: pull access denied".into(),
                },
            },
        ];

        let mut out = Vec::new();
        print_listing(&mut out, &records).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1. Image scanned:\n\
             \x20  Image:  bitnami/redis\n\
             \x20  Size:   54.21 MB\n\
             \x20  Layers: 5\n\
             \n\
             2. Image scanned:\n\
             \x20  Image:  ghost\n\
             \x20  Size:   Failed to fetch\n\
             \x20  Layers: -1\n\
             \x20  Error:  failed to pull ghost:1: pull access denied\n\
             \n"
        );
    }

    #[test]
    fn empty_listing_prints_nothing() {
        let mut out = Vec::new();
        print_listing(&mut out, &[]).unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn first_interrupt_cancels_second_exits() {
        let (tx, rx) = watch::channel(false);
        let exited = AtomicBool::new(false);

        relay_interrupts(interrupts(vec![Ok(()), Ok(())]), tx, || {
            exited.store(true, Ordering::SeqCst)
        })
        .await;

        assert!(*rx.borrow());
        assert!(exited.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn single_interrupt_only_cancels() {
        let (tx, rx) = watch::channel(false);
        let exited = AtomicBool::new(false);

        relay_interrupts(interrupts(vec![Ok(())]), tx, || {
            exited.store(true, Ordering::SeqCst)
        })
        .await;

        assert!(*rx.borrow());
        assert!(!exited.load(Ordering::SeqCst));
    }

    #[test]
    fn summary_mentions_partial_metadata() {
        assert_eq!(summarize(0, 0), "No images found");
        assert_eq!(summarize(3, 0), "3 images found");
        assert_eq!(summarize(3, 1), "3 images found, 1 with partial metadata");
    }

    #[test]
    fn describes_sources() {
        assert_eq!(
            describe(&Source::Repo {
                repo: "bitnami".into(),
                chart: "redis".into(),
                version: None,
            }),
            "bitnami/redis"
        );
        assert_eq!(
            describe(&Source::Link("https://example.com/demo-0.1.0.tgz".into())),
            "https://example.com/demo-0.1.0.tgz"
        );
    }
}
