use {
    crate::{
        derivative::{self, DerivativeOutcome, DerivativeSpec, Role},
        event_log::EventLog,
        fingerprint::{fingerprint, storage_path},
        metadata::{self, ExifTags},
        Pipeline,
    },
    anyhow::{anyhow, Result},
    lightbox_shared::{IngestReport, Step},
    tokio::{fs, task},
    tracing::{info, warn},
};

/// A picture submitted for ingestion
#[derive(Debug, Clone)]
pub struct Upload {
    /// Name the picture was uploaded under, used only for reporting
    pub name: String,

    pub data: Vec<u8>,
}

enum Ingested {
    Complete,

    /// Catalogued, but missing at least one derivative
    Incomplete,
}

async fn ingest_one(
    pipeline: &Pipeline,
    upload: &Upload,
    specs: &[DerivativeSpec],
    log: Option<&EventLog>,
) -> Result<Ingested> {
    let hash = fingerprint(&upload.data);
    let path = storage_path(&hash);

    if pipeline.catalog.picture_by_path(&path).await?.is_some() {
        return Err(anyhow!("{} duplicates {}", upload.name, path));
    }

    let tags = task::block_in_place(|| pipeline.extractor.extract(&upload.data))?;

    let fields = metadata::normalize(&ExifTags::from_tags(&tags), &pipeline.compat)?;

    let full = pipeline.layout.full_dir().join(&path);

    if fs::metadata(&full).await.is_err() {
        fs::write(&full, &upload.data).await?;
    }

    let outcomes = derivative::generate(
        pipeline.renderer.as_ref(),
        &full,
        &path,
        (fields.width, fields.height),
        specs,
    )
    .await;

    let rendered = outcomes.iter().all(DerivativeOutcome::succeeded);

    if let Some(log) = log {
        log.record(&upload.name, Step::Derivative, rendered).await;
    }

    let id = pipeline.catalog.insert_picture(&path, &fields).await?;

    info!(
        "inserted {} as {} (id {}, taken {})",
        upload.name, path, id, fields.timestamp.calendar
    );

    Ok(if rendered {
        Ingested::Complete
    } else {
        Ingested::Incomplete
    })
}

/// Add the specified uploads to the catalog, storing each under its content hash along with its thumbnail and
/// half-resolution derivatives.
///
/// Uploads are handled one at a time, and a failure to handle one of them is reported in the returned
/// [IngestReport] rather than as an error.  An error is returned only if the storage directories are unusable.
pub async fn ingest(
    pipeline: &Pipeline,
    uploads: Vec<Upload>,
    log: Option<&EventLog>,
) -> Result<IngestReport> {
    let layout = &pipeline.layout;

    for dir in [layout.full_dir(), layout.half_dir(), layout.thumb_dir()] {
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| anyhow!("unable to create {}: {:?}", dir.display(), e))?;
    }

    let specs = [
        DerivativeSpec {
            role: Role::Thumbnail,
            divisor: 3,
            directory: layout.thumb_dir(),
        },
        DerivativeSpec {
            role: Role::Half,
            divisor: 2,
            directory: layout.half_dir(),
        },
    ];

    let mut report = IngestReport::default();

    let count = uploads.len();

    for (index, upload) in uploads.into_iter().enumerate() {
        match ingest_one(pipeline, &upload, &specs, log).await {
            Ok(ingested) => {
                if let Some(log) = log {
                    log.record(&upload.name, Step::Catalog, true).await;
                }

                if let Ingested::Incomplete = ingested {
                    report.incomplete.push(upload.name.clone());
                }

                report.accepted.push(upload.name);
            }

            Err(e) => {
                warn!("({} of {}) rejected {}: {:?}", index + 1, count, upload.name, e);

                if let Some(log) = log {
                    log.record(&upload.name, Step::Catalog, false).await;
                }

                report.rejected.push(upload.name);
            }
        }
    }

    if let Some(log) = log {
        log.finish().await;
    }

    Ok(report)
}
