use {
    anyhow::Result,
    futures::{future, FutureExt, TryFutureExt},
    lightbox_server::{
        catalog::SqliteCatalog, derivative::ImageRenderer, metadata::Exiv2Extractor, Options,
        Pipeline,
    },
    std::sync::Arc,
    structopt::StructOpt,
    tokio::signal,
    tracing::{info, warn},
};

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    let options = Options::from_args();

    let catalog = Arc::new(SqliteCatalog::open(&options.pipeline.state_file).await?);

    let pipeline = Arc::new(Pipeline::new(
        &options.pipeline,
        catalog.clone(),
        Arc::new(Exiv2Extractor::new()?),
        Arc::new(ImageRenderer::default()),
    ));

    future::select(
        lightbox_server::serve(&pipeline, options.address).boxed(),
        signal::ctrl_c().err_into::<anyhow::Error>().boxed(),
    )
    .await
    .factor_first()
    .0?;

    info!("shutting down");

    drop(pipeline);

    match Arc::try_unwrap(catalog) {
        Ok(catalog) => catalog.close().await?,
        Err(_) => warn!("catalog still in use by a running refresh; not closing it cleanly"),
    }

    Ok(())
}
