use {
    crate::{
        archive::ArchiveOutcome,
        derivative::{self, DerivativeOutcome, DerivativeSpec, Role},
        event_log::EventLog,
        fingerprint::fingerprint,
        metadata::{self, ExifTags},
        Pipeline,
    },
    anyhow::{anyhow, Result},
    lightbox_shared::{Review, ReviewPictureRecord, Step},
    std::{collections::HashSet, path::Path, slice, time::Instant},
    tokio::{fs, task},
    tracing::{info, warn},
};

const PICTURE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// What a refresh does with one file of a review directory
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Decision {
    /// First sighting of this name: add it to the review
    Create,

    /// Known name whose contents changed: record the new hash
    UpdateHash,

    /// Known name, unchanged contents: nothing to do
    Skip,
}

pub fn decide(existing: Option<&ReviewPictureRecord>, hash: &str) -> Decision {
    match existing {
        None => Decision::Create,
        Some(picture) if picture.hash == hash => Decision::Skip,
        Some(_) => Decision::UpdateHash,
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,

    /// Files which could not be read or understood at all
    pub failed: usize,

    pub archives: Vec<ArchiveOutcome>,
}

impl RunSummary {
    fn count(&mut self, decision: Decision) {
        match decision {
            Decision::Create => self.created += 1,
            Decision::UpdateHash => self.updated += 1,
            Decision::Skip => self.skipped += 1,
        }
    }
}

fn is_picture(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            PICTURE_EXTENSIONS
                .iter()
                .any(|known| extension.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// List the names of the picture files directly inside `dir`, sorted.
pub async fn picture_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }

        match entry.file_name().into_string() {
            Ok(name) if is_picture(&name) => names.push(name),
            Ok(_) => (),
            Err(name) => warn!("ignoring non-UTF-8 file name {:?}", name),
        }
    }

    names.sort();

    Ok(names)
}

fn half_spec(root: &Path) -> DerivativeSpec {
    DerivativeSpec {
        role: Role::Half,
        divisor: 2,
        directory: root.join(crate::HALF_DIRECTORY),
    }
}

async fn render(
    pipeline: &Pipeline,
    source: &Path,
    name: &str,
    dimensions: (u32, u32),
    spec: &DerivativeSpec,
) -> bool {
    derivative::generate(
        pipeline.renderer.as_ref(),
        source,
        name,
        dimensions,
        slice::from_ref(spec),
    )
    .await
    .iter()
    .all(DerivativeOutcome::succeeded)
}

async fn reconcile_file(
    pipeline: &Pipeline,
    review: &Review,
    root: &Path,
    name: &str,
    known: bool,
    log: &EventLog,
) -> Result<Decision> {
    let source = root.join(name);

    let data = fs::read(&source).await?;

    let tags = task::block_in_place(|| pipeline.extractor.extract(&data))?;

    let dimensions = metadata::dimensions(&ExifTags::from_tags(&tags))?;

    let hash = fingerprint(&data);

    let existing = if known {
        pipeline.catalog.review_picture(&review.name, name).await?
    } else {
        None
    };

    let decision = decide(existing.as_ref(), &hash);

    match decision {
        Decision::Create => {
            let (width, height) = dimensions;

            let result = pipeline
                .catalog
                .insert_review_picture(&ReviewPictureRecord {
                    path: name.to_owned(),
                    name: name.to_owned(),
                    hash,
                    review_id: review.id,
                    review_name: review.name.clone(),
                    landscape: width > height,
                    status: 0,
                    comment: String::new(),
                })
                .await;

            if let Err(e) = &result {
                warn!("unable to add {} to review {}: {:?}", name, review.name, e);
            }

            log.record(name, Step::Catalog, result.is_ok()).await;
        }

        Decision::UpdateHash => {
            let result = pipeline
                .catalog
                .update_review_picture_hash(&review.name, name, &hash)
                .await;

            if let Err(e) = &result {
                warn!("unable to update hash of {}: {:?}", name, e);
            }

            log.record(name, Step::Catalog, result.is_ok()).await;
        }

        Decision::Skip => {
            log.record(name, Step::Catalog, true).await;
            log.record(name, Step::Derivative, true).await;

            return Ok(decision);
        }
    }

    let rendered = render(pipeline, &source, name, dimensions, &half_spec(root)).await;

    log.record(name, Step::Derivative, rendered).await;

    Ok(decision)
}

/// Bring the catalog and derivatives of the named review in line with the contents of its directory, then
/// rebuild its archives.
///
/// Progress is written to `log`, which is emptied first and ends with the terminating entry once every archive
/// has been written.  A failure to handle one file is logged and does not stop the run; only an unknown review or
/// an unreadable review directory does.
pub async fn refresh(pipeline: &Pipeline, review_name: &str, log: &EventLog) -> Result<RunSummary> {
    let review = pipeline
        .catalog
        .review(review_name)
        .await?
        .ok_or_else(|| anyhow!("no such review: {}", review_name))?;

    let root = pipeline.layout.review_root(review_name);

    let files = picture_files(&root)
        .await
        .map_err(|e| anyhow!("unable to list {}: {:?}", root.display(), e))?;

    info!("starting refresh of {} ({} files)", review_name, files.len());

    let then = Instant::now();

    log.reset().await?;

    let known = review
        .pictures
        .iter()
        .map(|picture| picture.name.as_str())
        .collect::<HashSet<_>>();

    let mut summary = RunSummary::default();

    for (index, name) in files.iter().enumerate() {
        match reconcile_file(
            pipeline,
            &review,
            &root,
            name,
            known.contains(name.as_str()),
            log,
        )
        .await
        {
            Ok(decision) => {
                info!("({} of {}) {:?} {}", index + 1, files.len(), decision, name);

                summary.count(decision);
            }

            Err(e) => {
                warn!("({} of {}) unable to handle {}: {:?}", index + 1, files.len(), name, e);

                log.record(name, Step::Catalog, false).await;
                log.record(name, Step::Derivative, false).await;

                summary.failed += 1;
            }
        }
    }

    summary.archives = pipeline
        .archiver
        .archive(review_name, &root, &files, Some(log))
        .await;

    log.finish().await;

    info!(
        "refresh of {} took {:?} (created {}; updated {}; skipped {}; failed {})",
        review_name,
        then.elapsed(),
        summary.created,
        summary.updated,
        summary.skipped,
        summary.failed
    );

    Ok(summary)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            catalog::Catalog,
            event_log,
            test::{self, tags},
        },
        lightbox_shared::EventLogEntry,
        maplit::hashset,
    };

    fn entry(subject: &str, step: Step, succeeded: bool) -> EventLogEntry {
        EventLogEntry {
            subject: subject.into(),
            step,
            succeeded,
        }
    }

    #[test]
    fn decisions() {
        let picture = ReviewPictureRecord {
            path: "a.jpg".into(),
            name: "a.jpg".into(),
            hash: "aaa".into(),
            review_id: 1,
            review_name: "mariage".into(),
            landscape: true,
            status: 0,
            comment: "".into(),
        };

        assert_eq!(decide(None, "aaa"), Decision::Create);
        assert_eq!(decide(Some(&picture), "aaa"), Decision::Skip);
        assert_eq!(decide(Some(&picture), "bbb"), Decision::UpdateHash);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn listing() -> Result<()> {
        let state = test::init(hashset![]).await?;
        let root = state.review_root("mariage").await?;

        for name in ["b.JPG", "a.jpeg", "c.png", "notes.txt", "d"] {
            fs::write(root.join(name), b"").await?;
        }

        fs::create_dir(root.join("e.jpg")).await?;

        assert_eq!(
            picture_files(&root).await?,
            vec!["a.jpeg", "b.JPG", "c.png"]
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn second_run_skips_everything() -> Result<()> {
        let state = test::init(hashset![]).await?;
        let root = state.review_root("mariage").await?;

        for (name, width) in [("a.jpg", 600), ("b.jpg", 300)] {
            fs::write(root.join(name), tags(name, width, 400)).await?;
        }

        let log = EventLog::new(state.pipeline.layout.review_log("mariage"));

        let first = refresh(&state.pipeline, "mariage", &log).await?;

        assert_eq!((first.created, first.updated, first.skipped), (2, 0, 0));

        let review = state.pipeline.catalog.review("mariage").await?.unwrap();

        assert_eq!(review.pictures.len(), 2);
        assert!(review.pictures[0].landscape);
        assert!(!review.pictures[1].landscape);

        assert_eq!(
            fs::read_to_string(root.join("half").join("a.jpg")).await?,
            "300x200"
        );

        let second = refresh(&state.pipeline, "mariage", &log).await?;

        assert_eq!(
            (second.created, second.updated, second.skipped, second.failed),
            (0, 0, 2, 0)
        );

        assert_eq!(
            event_log::read_all(log.path()).await?,
            vec![
                entry("a.jpg", Step::Catalog, true),
                entry("a.jpg", Step::Derivative, true),
                entry("b.jpg", Step::Catalog, true),
                entry("b.jpg", Step::Derivative, true),
                entry("mariage.zip", Step::Archive, true),
                EventLogEntry::terminator(),
            ]
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn changed_contents_update_hash_only() -> Result<()> {
        let state = test::init(hashset![]).await?;
        let root = state.review_root("mariage").await?;
        let log = EventLog::new(state.pipeline.layout.review_log("mariage"));

        fs::write(root.join("a.jpg"), tags("a.jpg", 600, 400)).await?;

        refresh(&state.pipeline, "mariage", &log).await?;

        let catalog = &state.pipeline.catalog;

        catalog
            .set_review_picture_status("mariage", "a.jpg", 1)
            .await?;

        catalog
            .set_review_picture_comment("mariage", "a.jpg", "superbe")
            .await?;

        let before = catalog.review_picture("mariage", "a.jpg").await?.unwrap();

        fs::write(root.join("a.jpg"), tags("a.jpg (retouched)", 800, 400)).await?;

        let summary = refresh(&state.pipeline, "mariage", &log).await?;

        assert_eq!((summary.created, summary.updated), (0, 1));

        let after = catalog.review_picture("mariage", "a.jpg").await?.unwrap();

        assert_ne!(after.hash, before.hash);
        assert_eq!(
            ReviewPictureRecord {
                hash: before.hash.clone(),
                ..after.clone()
            },
            before
        );

        assert_eq!(after.status, 1);
        assert_eq!(after.comment, "superbe");

        assert_eq!(
            fs::read_to_string(root.join("half").join("a.jpg")).await?,
            "400x200"
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn step_failures_are_isolated() -> Result<()> {
        let state = test::init(hashset!["b.jpg"]).await?;
        let root = state.review_root("mariage").await?;
        let log = EventLog::new(state.pipeline.layout.review_log("mariage"));

        fs::write(root.join("a.jpg"), b"this is not JSON").await?;
        fs::write(root.join("b.jpg"), tags("b.jpg", 600, 400)).await?;
        fs::write(root.join("c.jpg"), tags("c.jpg", 600, 400)).await?;
        fs::write(root.join("fail-render.jpg"), tags("fail-render.jpg", 600, 400)).await?;

        let summary = refresh(&state.pipeline, "mariage", &log).await?;

        assert_eq!((summary.created, summary.failed), (3, 1));

        assert_eq!(
            event_log::read_all(log.path()).await?,
            vec![
                entry("a.jpg", Step::Catalog, false),
                entry("a.jpg", Step::Derivative, false),
                entry("b.jpg", Step::Catalog, false),
                entry("b.jpg", Step::Derivative, true),
                entry("c.jpg", Step::Catalog, true),
                entry("c.jpg", Step::Derivative, true),
                entry("fail-render.jpg", Step::Catalog, true),
                entry("fail-render.jpg", Step::Derivative, false),
                entry("mariage.zip", Step::Archive, true),
                EventLogEntry::terminator(),
            ]
        );

        let review = state.pipeline.catalog.review("mariage").await?.unwrap();

        assert_eq!(
            review
                .pictures
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>(),
            vec!["c.jpg", "fail-render.jpg"]
        );

        assert!(fs::metadata(root.join("half").join("b.jpg")).await.is_ok());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn terminator_follows_every_archive() -> Result<()> {
        let state = test::init_with_chunk_size(hashset![], 2).await?;
        let root = state.review_root("mariage").await?;
        let log = EventLog::new(state.pipeline.layout.review_log("mariage"));

        for index in 1..=5 {
            let name = format!("{}.jpg", index);

            fs::write(root.join(&name), tags(&name, 600, 400)).await?;
        }

        let summary = refresh(&state.pipeline, "mariage", &log).await?;

        assert_eq!(
            summary
                .archives
                .iter()
                .map(|archive| (archive.name.as_str(), archive.files))
                .collect::<Vec<_>>(),
            vec![
                ("mariage-partie-1.zip", 2),
                ("mariage-partie-2.zip", 2),
                ("mariage-partie-3.zip", 1),
            ]
        );

        let entries = event_log::read_all(log.path()).await?;

        assert!(entries.last().unwrap().is_terminator());
        assert_eq!(
            entries.iter().filter(|e| e.is_terminator()).count(),
            1
        );

        let archives = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.step == Step::Archive)
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        assert_eq!(archives.len(), 3);
        assert!(archives.iter().all(|&index| index < entries.len() - 1));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn run_level_failures() -> Result<()> {
        let state = test::init(hashset![]).await?;
        let log = EventLog::new(state.pipeline.layout.review_log("inconnu"));

        assert!(refresh(&state.pipeline, "inconnu", &log).await.is_err());

        state.pipeline.catalog.create_review("vide", "x").await?;

        let log = EventLog::new(state.pipeline.layout.review_log("vide"));

        assert!(refresh(&state.pipeline, "vide", &log).await.is_err());
        assert!(event_log::read_all(log.path()).await?.is_empty());

        Ok(())
    }
}
