use {
    anyhow::{anyhow, Result},
    image::{imageops::FilterType, DynamicImage, ImageFormat, ImageOutputFormat},
    std::{
        fmt::{self, Display},
        fs::File,
        io::{Cursor, Write},
        path::{Path, PathBuf},
    },
    tokio::{fs, task},
    tracing::{info, warn},
};

const JPEG_QUALITY: u8 = 90;

/// What a derivative is displayed as
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Role {
    Thumbnail,
    Half,
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Thumbnail => write!(f, "thumbnail"),
            Role::Half => write!(f, "half"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DerivativeSpec {
    pub role: Role,

    /// Width and height of the source are each divided by this
    pub divisor: u32,

    /// Directory the derivative is written to, under the source's file name
    pub directory: PathBuf,
}

impl DerivativeSpec {
    pub fn target(&self, (width, height): (u32, u32)) -> (u32, u32) {
        let divisor = self.divisor.max(1);

        ((width / divisor).max(1), (height / divisor).max(1))
    }
}

/// Produces a resized copy of an image file.
pub trait DerivativeRenderer: Send + Sync {
    fn render(&self, source: &Path, output: &Path, width: u32, height: u32) -> Result<()>;
}

/// [DerivativeRenderer] backed by the `image` crate
pub struct ImageRenderer {
    pub quality: u8,
}

impl Default for ImageRenderer {
    fn default() -> Self {
        Self {
            quality: JPEG_QUALITY,
        }
    }
}

impl DerivativeRenderer for ImageRenderer {
    fn render(&self, source: &Path, output: &Path, width: u32, height: u32) -> Result<()> {
        let original = image::open(source)?;

        let transformed = original.resize_exact(width, height, FilterType::Lanczos3);

        let (transformed, format) = match ImageFormat::from_path(output)? {
            ImageFormat::Jpeg => (
                DynamicImage::ImageRgb8(transformed.to_rgb8()),
                ImageOutputFormat::Jpeg(self.quality),
            ),
            format => (transformed, ImageOutputFormat::from(format)),
        };

        let mut encoded = Cursor::new(Vec::new());

        transformed.write_to(&mut encoded, format)?;

        File::create(output)?.write_all(&encoded.into_inner())?;

        Ok(())
    }
}

#[derive(Debug)]
pub struct DerivativeOutcome {
    pub role: Role,
    pub path: PathBuf,
    pub result: Result<()>,
}

impl DerivativeOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Render one derivative of `source` per entry of `specs`.
///
/// Every spec is attempted, whatever happened to the previous ones, and one outcome is returned per spec in the
/// same order.
pub async fn generate(
    renderer: &dyn DerivativeRenderer,
    source: &Path,
    file_name: &str,
    dimensions: (u32, u32),
    specs: &[DerivativeSpec],
) -> Vec<DerivativeOutcome> {
    let mut outcomes = Vec::with_capacity(specs.len());

    for spec in specs {
        let path = spec.directory.join(file_name);
        let (width, height) = spec.target(dimensions);

        let result = async {
            fs::create_dir_all(&spec.directory).await?;

            task::block_in_place(|| renderer.render(source, &path, width, height))
        }
        .await
        .map_err(|e| anyhow!("unable to render {} of {}: {:?}", spec.role, file_name, e));

        match &result {
            Ok(()) => info!("{} {} ({}x{})", spec.role, path.display(), width, height),
            Err(e) => warn!("{}", e),
        }

        outcomes.push(DerivativeOutcome {
            role: spec.role,
            path,
            result,
        });
    }

    outcomes
}
