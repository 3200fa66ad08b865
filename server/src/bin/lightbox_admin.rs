use {
    anyhow::{anyhow, Result},
    lightbox_server::{
        catalog::{Catalog, SqliteCatalog},
        derivative::ImageRenderer,
        event_log::{self, EventLog},
        ingest::{self, Upload},
        metadata::Exiv2Extractor,
        reconcile, Pipeline, PipelineOptions,
    },
    std::{path::Path, sync::Arc},
    structopt::StructOpt,
    tokio::fs,
    tracing::warn,
};

#[derive(StructOpt, Debug)]
#[structopt(name = "lightbox-admin", about = "Photo ingestion and review archive admin tool")]
enum Command {
    /// Add a new review to the catalog
    CreateReview {
        #[structopt(flatten)]
        options: PipelineOptions,

        /// Name of the new review, which is also the name of its directory
        name: String,

        /// Password clients use to access the review
        password: String,
    },

    /// Remove a review and its picture records from the catalog (files are left alone)
    DeleteReview {
        #[structopt(flatten)]
        options: PipelineOptions,

        name: String,
    },

    /// List reviews along with how many pictures each holds
    ListReviews {
        #[structopt(flatten)]
        options: PipelineOptions,
    },

    /// Tag a picture with a species, or clear its species if none is specified
    SetSpecies {
        #[structopt(flatten)]
        options: PipelineOptions,

        /// Picture id
        id: i64,

        #[structopt(long)]
        species: Option<i64>,
    },

    /// Print the pictures tagged with a species, most recently taken first
    Species {
        #[structopt(flatten)]
        options: PipelineOptions,

        species: i64,
    },

    /// Add picture files to the catalog
    Ingest {
        #[structopt(flatten)]
        options: PipelineOptions,

        /// File to which to write progress events
        #[structopt(long)]
        log_file: Option<String>,

        files: Vec<String>,
    },

    /// Reconcile a review with the contents of its directory and rebuild its archives
    Refresh {
        #[structopt(flatten)]
        options: PipelineOptions,

        review: String,
    },

    /// Print the events logged by the most recent refresh of a review
    Events {
        #[structopt(flatten)]
        options: PipelineOptions,

        review: String,
    },
}

async fn open(options: &PipelineOptions) -> Result<(Arc<SqliteCatalog>, Pipeline)> {
    let catalog = Arc::new(SqliteCatalog::open(&options.state_file).await?);

    let pipeline = Pipeline::new(
        options,
        catalog.clone(),
        Arc::new(Exiv2Extractor::new()?),
        Arc::new(ImageRenderer::default()),
    );

    Ok((catalog, pipeline))
}

async fn close(catalog: Arc<SqliteCatalog>, pipeline: Pipeline) -> Result<()> {
    drop(pipeline);

    Arc::try_unwrap(catalog)
        .map_err(|_| anyhow!("catalog still in use"))?
        .close()
        .await
}

async fn upload(file: &str) -> Result<Upload> {
    Ok(Upload {
        name: Path::new(file)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(file)
            .to_owned(),
        data: fs::read(file).await?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    match Command::from_args() {
        Command::CreateReview {
            options,
            name,
            password,
        } => {
            let catalog = SqliteCatalog::open(&options.state_file).await?;

            catalog.create_review(&name, &password).await?;

            fs::create_dir_all(Path::new(&options.review_directory).join(&name)).await?;

            catalog.close().await?;
        }

        Command::DeleteReview { options, name } => {
            let catalog = SqliteCatalog::open(&options.state_file).await?;

            catalog.delete_review(&name).await?;

            catalog.close().await?;
        }

        Command::ListReviews { options } => {
            let catalog = SqliteCatalog::open(&options.state_file).await?;

            for review in catalog.reviews().await? {
                println!("{} ({} pictures)", review.name, review.pictures.len());
            }

            catalog.close().await?;

            return Ok(());
        }

        Command::SetSpecies {
            options,
            id,
            species,
        } => {
            let catalog = SqliteCatalog::open(&options.state_file).await?;

            catalog.set_species(id, species).await?;

            catalog.close().await?;
        }

        Command::Species { options, species } => {
            let catalog = SqliteCatalog::open(&options.state_file).await?;

            for picture in catalog.pictures_by_species(species).await? {
                println!("{}", serde_json::to_string(&picture)?);
            }

            catalog.close().await?;

            return Ok(());
        }

        Command::Ingest {
            options,
            log_file,
            files,
        } => {
            let (catalog, pipeline) = open(&options).await?;

            let mut uploads = Vec::with_capacity(files.len());

            for file in &files {
                match upload(file).await {
                    Ok(upload) => uploads.push(upload),
                    Err(e) => warn!("unable to read {}: {:?}", file, e),
                }
            }

            let log = log_file.map(EventLog::new);

            if let Some(log) = &log {
                log.reset().await?;
            }

            let report = ingest::ingest(&pipeline, uploads, log.as_ref()).await?;

            println!("{}", serde_json::to_string_pretty(&report)?);

            close(catalog, pipeline).await?;
        }

        Command::Refresh { options, review } => {
            let (catalog, pipeline) = open(&options).await?;

            let log = EventLog::new(pipeline.layout.review_log(&review));

            let summary = reconcile::refresh(&pipeline, &review, &log).await?;

            println!(
                "created {}; updated {}; skipped {}; failed {}",
                summary.created, summary.updated, summary.skipped, summary.failed
            );

            for archive in &summary.archives {
                match &archive.result {
                    Ok(size) => println!("{} ({} files, {} bytes)", archive.name, archive.files, size),
                    Err(e) => println!("{} failed: {:?}", archive.name, e),
                }
            }

            close(catalog, pipeline).await?;
        }

        Command::Events { options, review } => {
            let path = Path::new(&options.review_directory)
                .join(&review)
                .join(lightbox_server::EVENT_LOG_FILE);

            for entry in event_log::read_all(&path).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }

            return Ok(());
        }
    }

    println!("success!");

    Ok(())
}
