use {
    crate::{
        archive::Archiver, catalog::Catalog, derivative::DerivativeRenderer, event_log::EventLog,
        ingest::Upload, lock_map::LockMap, metadata::MetadataExtractor, warp_util::HttpError,
    },
    anyhow::Result,
    bytes::Bytes,
    futures::future::TryFutureExt,
    http::{
        header,
        response::{self, Response},
    },
    hyper::Body,
    lightbox_shared::{
        EventLogEntry, EventsResponse, PictureAction, PictureQuery, RefreshResponse, ReviewPictureUpdate,
        UploadQuery,
    },
    serde::Serialize,
    std::{
        convert::Infallible,
        net::SocketAddrV4,
        num::NonZeroUsize,
        path::PathBuf,
        sync::Arc,
    },
    structopt::StructOpt,
    tokio::task,
    tracing::{info, warn},
    warp::{Filter, Rejection, Reply},
};

pub mod archive;
pub mod catalog;
pub mod derivative;
pub mod event_log;
pub mod fingerprint;
pub mod ingest;
pub mod metadata;
pub mod reconcile;

mod lock_map;
mod warp_util;

const MAX_UPLOAD_BYTES: u64 = 64 * 1024 * 1024;

pub const FULL_DIRECTORY: &str = "full";
pub const HALF_DIRECTORY: &str = "half";
pub const THUMB_DIRECTORY: &str = "thumb";
pub const EVENT_LOG_FILE: &str = "events.log";

/// Legacy behaviors which are kept unless explicitly turned off
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Compat {
    /// Re-assemble the combined date/time tag the old way (date separators replaced by slashes, a stray brace
    /// appended) and parse it leniently, rather than requiring exactly "YYYY:MM:DD HH:MM:SS"
    pub legacy_datetime_join: bool,

    /// Produce a single empty archive for a review with no pictures, rather than none at all
    pub empty_archive: bool,
}

impl Default for Compat {
    fn default() -> Self {
        Self {
            legacy_datetime_join: true,
            empty_archive: true,
        }
    }
}

#[derive(StructOpt, Debug, Clone)]
pub struct PipelineOptions {
    /// SQLite database to create or reuse
    #[structopt(long)]
    pub state_file: String,

    /// Directory in which to store ingested pictures and their derivatives
    #[structopt(long)]
    pub picture_directory: String,

    /// Directory containing one sub-directory of pictures per review
    #[structopt(long)]
    pub review_directory: String,

    /// Maximum number of pictures per review archive
    #[structopt(long, default_value = "50")]
    pub archive_chunk_size: NonZeroUsize,

    /// If set, require the combined date/time tag to be exactly "YYYY:MM:DD HH:MM:SS"
    #[structopt(long)]
    pub strict_datetime: bool,

    /// If set, write no archive at all for a review with no pictures
    #[structopt(long)]
    pub skip_empty_archive: bool,
}

impl PipelineOptions {
    pub fn compat(&self) -> Compat {
        Compat {
            legacy_datetime_join: !self.strict_datetime,
            empty_archive: !self.skip_empty_archive,
        }
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = "lightbox-server", about = "Photo ingestion and review archive backend")]
pub struct Options {
    /// Address to which to bind
    #[structopt(long)]
    pub address: SocketAddrV4,

    #[structopt(flatten)]
    pub pipeline: PipelineOptions,
}

/// Where pictures, derivatives, review folders and event logs live on disk
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub picture_directory: PathBuf,
    pub review_directory: PathBuf,
}

impl StorageLayout {
    pub fn full_dir(&self) -> PathBuf {
        self.picture_directory.join(FULL_DIRECTORY)
    }

    pub fn half_dir(&self) -> PathBuf {
        self.picture_directory.join(HALF_DIRECTORY)
    }

    pub fn thumb_dir(&self) -> PathBuf {
        self.picture_directory.join(THUMB_DIRECTORY)
    }

    pub fn review_root(&self, review: &str) -> PathBuf {
        self.review_directory.join(review)
    }

    pub fn review_log(&self, review: &str) -> PathBuf {
        self.review_root(review).join(EVENT_LOG_FILE)
    }
}

/// Everything ingestion and review refreshes need: collaborators, storage layout and settings
pub struct Pipeline {
    pub catalog: Arc<dyn Catalog>,
    pub extractor: Arc<dyn MetadataExtractor>,
    pub renderer: Arc<dyn DerivativeRenderer>,
    pub layout: StorageLayout,
    pub compat: Compat,
    pub archiver: Archiver,
}

impl Pipeline {
    pub fn new(
        options: &PipelineOptions,
        catalog: Arc<dyn Catalog>,
        extractor: Arc<dyn MetadataExtractor>,
        renderer: Arc<dyn DerivativeRenderer>,
    ) -> Self {
        let compat = options.compat();

        Self {
            catalog,
            extractor,
            renderer,
            layout: StorageLayout {
                picture_directory: PathBuf::from(&options.picture_directory),
                review_directory: PathBuf::from(&options.review_directory),
            },
            compat,
            archiver: Archiver {
                chunk_size: options.archive_chunk_size,
                compat,
            },
        }
    }
}

fn response() -> response::Builder {
    Response::builder()
}

fn json_response(value: &impl Serialize) -> Result<Response<Body>> {
    let body = serde_json::to_vec(value)?;

    Ok(response()
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

async fn require_review(pipeline: &Pipeline, name: &str) -> Result<()> {
    if pipeline.catalog.review(name).await?.is_some() {
        Ok(())
    } else {
        Err(HttpError::not_found(format!("no such review: {}", name)).into())
    }
}

async fn events(pipeline: &Pipeline, name: &str) -> Result<EventsResponse> {
    require_review(pipeline, name).await?;

    let events = event_log::read_all(&pipeline.layout.review_log(name)).await?;

    Ok(EventsResponse {
        done: events.iter().any(EventLogEntry::is_terminator),
        events,
    })
}

/// Start a refresh of the named review in the background, returning the files it will process.
///
/// The previous run's log is removed before this returns, so a poller never mistakes it for the new run's.
async fn start_refresh(
    pipeline: Arc<Pipeline>,
    runs: Arc<LockMap<String, ()>>,
    name: String,
) -> Result<RefreshResponse> {
    require_review(&pipeline, &name).await?;

    let guard = runs.try_write(name.clone()).await.ok_or_else(|| {
        HttpError::conflict(format!("refresh of {} already in progress", name))
    })?;

    let log = EventLog::new(pipeline.layout.review_log(&name));

    let prepared = async {
        let root = pipeline.layout.review_root(&name);

        let pictures = reconcile::picture_files(&root).await.map_err(|e| {
            warn!("unable to list {}: {:?}", root.display(), e);

            HttpError::not_found(format!("no directory for review {}", name))
        })?;

        log.reset().await?;

        Ok::<_, anyhow::Error>(pictures)
    }
    .await;

    let pictures = match prepared {
        Ok(pictures) => pictures,
        Err(e) => {
            drop(guard);

            runs.clean().await;

            return Err(e);
        }
    };

    task::spawn(async move {
        if let Err(e) = reconcile::refresh(&pipeline, &name, &log).await {
            warn!("refresh of {} failed: {:?}", name, e);
        }

        drop(guard);

        runs.clean().await;
    });

    Ok(RefreshResponse { pictures })
}

async fn update_review_picture(
    pipeline: &Pipeline,
    review: &str,
    picture: &str,
    update: ReviewPictureUpdate,
) -> Result<()> {
    match update {
        ReviewPictureUpdate::SetStatus(status) => {
            pipeline
                .catalog
                .set_review_picture_status(review, picture, status)
                .await
        }

        ReviewPictureUpdate::SetComment(comment) => {
            pipeline
                .catalog
                .set_review_picture_comment(review, picture, &comment)
                .await
        }
    }
}

fn routes(
    pipeline: &Arc<Pipeline>,
    runs: &Arc<LockMap<String, ()>>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    warp::post()
        .and(warp::path!("pictures"))
        .and(warp::query::<UploadQuery>())
        .and(warp::body::content_length_limit(MAX_UPLOAD_BYTES))
        .and(warp::body::bytes())
        .and_then({
            let pipeline = pipeline.clone();

            move |query: UploadQuery, body: Bytes| {
                let name = query.name.clone();
                let pipeline = pipeline.clone();

                async move {
                    json_response(
                        &ingest::ingest(
                            &pipeline,
                            vec![Upload {
                                name: query.name,
                                data: body.to_vec(),
                            }],
                            None,
                        )
                        .await?,
                    )
                }
                .map_err(move |e| {
                    warn!("error ingesting {}: {:?}", name, e);

                    Rejection::from(HttpError::from(e))
                })
            }
        })
        .or(warp::get().and(
            warp::path!("pictures")
                .and_then({
                    let pipeline = pipeline.clone();

                    move || {
                        let pipeline = pipeline.clone();

                        async move { json_response(&pipeline.catalog.pictures().await?) }.map_err(
                            |e| {
                                warn!("error retrieving pictures: {:?}", e);

                                Rejection::from(HttpError::from(e))
                            },
                        )
                    }
                })
                .or(warp::path!("reviews" / String / "events").and_then({
                    let pipeline = pipeline.clone();

                    move |name: String| {
                        let pipeline = pipeline.clone();

                        {
                            let name = name.clone();

                            async move { json_response(&events(&pipeline, &name).await?) }
                        }
                        .map_err(move |e| {
                            warn!("error retrieving events of {}: {:?}", name, e);

                            Rejection::from(HttpError::from(e))
                        })
                    }
                })),
        ))
        .or(warp::put()
            .and(warp::path!("reviews" / String / "refresh"))
            .and_then({
                let pipeline = pipeline.clone();
                let runs = runs.clone();

                move |name: String| {
                    let pipeline = pipeline.clone();
                    let runs = runs.clone();

                    {
                        let name = name.clone();

                        async move { json_response(&start_refresh(pipeline, runs, name).await?) }
                    }
                    .map_err(move |e| {
                        warn!("error starting refresh of {}: {:?}", name, e);

                        Rejection::from(HttpError::from(e))
                    })
                }
            }))
        .or(warp::put().and(
            warp::path!("pictures" / i64)
                .and(warp::query::<PictureQuery>())
                .and_then({
                    let pipeline = pipeline.clone();

                    move |id: i64, query: PictureQuery| {
                        let pipeline = pipeline.clone();
                        let action = query.action;

                        async move {
                            pipeline
                                .catalog
                                .set_starred(id, action == PictureAction::Star)
                                .await?;

                            Ok(warp::reply())
                        }
                        .map_err(move |e: anyhow::Error| {
                            warn!("error applying {:?} to picture {}: {:?}", action, id, e);

                            Rejection::from(HttpError::from(e))
                        })
                    }
                })
                .or(warp::path!("reviews" / String / "pictures" / String)
                    .and(warp::body::content_length_limit(MAX_UPLOAD_BYTES))
                    .and(warp::body::json())
                    .and_then({
                        let pipeline = pipeline.clone();

                        move |review: String, picture: String, update: ReviewPictureUpdate| {
                            let pipeline = pipeline.clone();

                            {
                                let review = review.clone();
                                let picture = picture.clone();

                                async move {
                                    update_review_picture(&pipeline, &review, &picture, update)
                                        .await?;

                                    Ok(warp::reply())
                                }
                            }
                            .map_err(move |e: anyhow::Error| {
                                warn!("error updating {} of review {}: {:?}", picture, review, e);

                                Rejection::from(HttpError::from(e))
                            })
                        }
                    })),
        ))
        .or(warp::delete().and(warp::path!("pictures" / i64)).and_then({
            let pipeline = pipeline.clone();

            move |id: i64| {
                let pipeline = pipeline.clone();

                async move {
                    pipeline.catalog.delete_picture(id).await?;

                    Ok(warp::reply())
                }
                .map_err(move |e: anyhow::Error| {
                    warn!("error deleting picture {}: {:?}", id, e);

                    Rejection::from(HttpError::from(e))
                })
            }
        }))
        .recover(warp_util::handle_rejection)
        .with(warp::log("lightbox"))
}

pub async fn serve(pipeline: &Arc<Pipeline>, address: SocketAddrV4) -> Result<()> {
    let runs = Arc::new(LockMap::default());

    let (address, future) = warp::serve(routes(pipeline, &runs)).try_bind_ephemeral(address)?;

    info!("listening on {}", address);

    future.await;

    Ok(())
}
