//! Packaging of review pictures into downloadable zip archives of bounded size.

use {
    crate::{event_log::EventLog, Compat},
    anyhow::{anyhow, Result},
    futures::future,
    lightbox_shared::Step,
    std::{
        fs::File,
        io,
        num::NonZeroUsize,
        path::{Path, PathBuf},
    },
    tokio::{fs, task},
    tracing::{info, warn},
    zip::{write::FileOptions, CompressionMethod, ZipWriter},
};

pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Contiguous run of files which end up in the same archive
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArchiveChunk {
    /// Archive file name, e.g. "wedding.zip" or "wedding-partie-2.zip"
    pub name: String,

    pub files: Vec<String>,
}

#[derive(Debug)]
pub struct ArchiveOutcome {
    pub name: String,
    pub path: PathBuf,
    pub files: usize,

    /// Size in bytes of the archive written
    pub result: Result<u64>,
}

#[derive(Debug, Clone)]
pub struct Archiver {
    pub chunk_size: NonZeroUsize,
    pub compat: Compat,
}

impl Archiver {
    /// Partition `files` into chunks of at most `chunk_size` entries, preserving order.
    pub fn plan(&self, review: &str, files: &[String]) -> Vec<ArchiveChunk> {
        let mut chunks = files
            .chunks(self.chunk_size.get())
            .map(<[String]>::to_vec)
            .collect::<Vec<_>>();

        if chunks.is_empty() && self.compat.empty_archive {
            chunks.push(Vec::new());
        }

        let count = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, files)| ArchiveChunk {
                name: if count == 1 {
                    format!("{}.zip", review)
                } else {
                    format!("{}-partie-{}.zip", review, index + 1)
                },
                files,
            })
            .collect()
    }

    /// Build one archive per chunk of `files`, reading members from `source_dir` and writing archives alongside
    /// them.
    ///
    /// Archives left by a previous run are removed first, since a different chunk count names them differently.
    /// Chunks are written concurrently, and this returns only once every one of them has finished, with outcomes
    /// in chunk order.  If `log` is specified, one [Step::Archive] entry is appended per chunk as it completes.
    pub async fn archive(
        &self,
        review: &str,
        source_dir: &Path,
        files: &[String],
        log: Option<&EventLog>,
    ) -> Vec<ArchiveOutcome> {
        if let Err(e) = remove_stale(review, source_dir).await {
            warn!(
                "unable to remove old archives of {} from {}: {:?}",
                review,
                source_dir.display(),
                e
            );
        }

        future::join_all(self.plan(review, files).into_iter().map(move |chunk| async move {
            let path = source_dir.join(&chunk.name);

            let result = task::spawn_blocking({
                let source_dir = source_dir.to_owned();
                let path = path.clone();
                let files = chunk.files.clone();

                move || write_archive(&source_dir, &path, &files)
            })
            .await
            .map_err(|e| anyhow!("archive task failed: {:?}", e))
            .and_then(|result| result);

            match &result {
                Ok(size) => info!(
                    "wrote {} ({} files, {} bytes)",
                    path.display(),
                    chunk.files.len(),
                    size
                ),
                Err(e) => warn!("unable to write {}: {:?}", path.display(), e),
            }

            if let Some(log) = log {
                log.record(&chunk.name, Step::Archive, result.is_ok()).await;
            }

            ArchiveOutcome {
                name: chunk.name,
                path,
                files: chunk.files.len(),
                result,
            }
        }))
        .await
    }
}

fn is_archive_of(review: &str, file_name: &str) -> bool {
    if file_name == format!("{}.zip", review) {
        return true;
    }

    file_name
        .strip_prefix(review)
        .and_then(|rest| rest.strip_prefix("-partie-"))
        .and_then(|rest| rest.strip_suffix(".zip"))
        .map(|index| !index.is_empty() && index.bytes().all(|byte| byte.is_ascii_digit()))
        .unwrap_or(false)
}

async fn remove_stale(review: &str, dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if entry
            .file_name()
            .to_str()
            .map(|name| is_archive_of(review, name))
            .unwrap_or(false)
        {
            fs::remove_file(entry.path()).await?;
        }
    }

    Ok(())
}

fn write_archive(source_dir: &Path, path: &Path, files: &[String]) -> Result<u64> {
    let mut zip = ZipWriter::new(File::create(path)?);

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for name in files {
        zip.start_file(name.as_str(), options)?;

        io::copy(&mut File::open(source_dir.join(name))?, &mut zip)?;
    }

    let file = zip.finish()?;

    file.sync_all()?;

    Ok(file.metadata()?.len())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        std::{fs, io::Read},
        tempfile::TempDir,
        zip::ZipArchive,
    };

    fn archiver(chunk_size: usize, compat: Compat) -> Archiver {
        Archiver {
            chunk_size: NonZeroUsize::new(chunk_size).unwrap(),
            compat,
        }
    }

    fn names(count: usize) -> Vec<String> {
        (1..=count).map(|n| format!("{:03}.jpg", n)).collect()
    }

    #[test]
    fn chunk_naming() {
        let archiver = archiver(50, Compat::default());

        let chunks = archiver.plan("mariage", &names(120));

        assert_eq!(
            chunks
                .iter()
                .map(|chunk| (chunk.name.as_str(), chunk.files.len()))
                .collect::<Vec<_>>(),
            vec![
                ("mariage-partie-1.zip", 50),
                ("mariage-partie-2.zip", 50),
                ("mariage-partie-3.zip", 20),
            ]
        );

        assert_eq!(chunks[1].files.first().unwrap(), "051.jpg");
        assert_eq!(chunks[2].files.last().unwrap(), "120.jpg");

        let chunks = archiver.plan("mariage", &names(30));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].name, "mariage.zip");
        assert_eq!(chunks[0].files, names(30));

        assert_eq!(archiver.plan("mariage", &names(50)).len(), 1);
        assert_eq!(archiver.plan("mariage", &names(51)).len(), 2);
    }

    #[test]
    fn empty_list() {
        let chunks = archiver(50, Compat::default()).plan("vide", &[]);

        assert_eq!(
            chunks,
            vec![ArchiveChunk {
                name: "vide.zip".into(),
                files: Vec::new(),
            }]
        );

        assert!(archiver(
            50,
            Compat {
                empty_archive: false,
                ..Compat::default()
            }
        )
        .plan("vide", &[])
        .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn archives_are_written_and_logged() -> Result<()> {
        let dir = TempDir::new()?;
        let files = names(12);

        for name in &files {
            fs::write(dir.path().join(name), name.repeat(100))?;
        }

        let log = EventLog::new(dir.path().join("events.log"));

        let outcomes = archiver(5, Compat::default())
            .archive("sortie", dir.path(), &files, Some(&log))
            .await;

        assert_eq!(
            outcomes.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(),
            vec![
                "sortie-partie-1.zip",
                "sortie-partie-2.zip",
                "sortie-partie-3.zip"
            ]
        );

        for (outcome, expected) in outcomes.iter().zip([5, 5, 2]) {
            assert!(*outcome.result.as_ref().unwrap() > 0);
            assert_eq!(outcome.files, expected);

            let mut archive = ZipArchive::new(File::open(&outcome.path)?)?;

            assert_eq!(archive.len(), expected);

            let mut member = archive.by_index(0)?;
            let mut contents = String::new();

            member.read_to_string(&mut contents)?;

            assert_eq!(contents, member.name().repeat(100));
        }

        let mut logged = crate::event_log::read_all(log.path())
            .await?
            .into_iter()
            .map(|entry| {
                assert_eq!(entry.step, Step::Archive);
                assert!(entry.succeeded);
                entry.subject
            })
            .collect::<Vec<_>>();

        logged.sort();

        assert_eq!(
            logged,
            vec![
                "sortie-partie-1.zip",
                "sortie-partie-2.zip",
                "sortie-partie-3.zip"
            ]
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn missing_member_fails_only_its_chunk() -> Result<()> {
        let dir = TempDir::new()?;
        let files = names(4);

        for name in &files[..3] {
            fs::write(dir.path().join(name), b"data")?;
        }

        let log = EventLog::new(dir.path().join("events.log"));

        let outcomes = archiver(2, Compat::default())
            .archive("incomplet", dir.path(), &files, Some(&log))
            .await;

        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());

        let entries = crate::event_log::read_all(log.path()).await?;

        assert_eq!(entries.len(), 2);
        assert!(entries
            .iter()
            .any(|entry| entry.subject == "incomplet-partie-2.zip" && !entry.succeeded));

        Ok(())
    }

    #[test]
    fn archive_names() {
        assert!(is_archive_of("mariage", "mariage.zip"));
        assert!(is_archive_of("mariage", "mariage-partie-12.zip"));
        assert!(!is_archive_of("mariage", "mariage-partie-.zip"));
        assert!(!is_archive_of("mariage", "mariage-bis.zip"));
        assert!(!is_archive_of("mariage", "001.jpg"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn previous_archives_are_replaced() -> Result<()> {
        let dir = TempDir::new()?;
        let files = names(3);

        for name in &files {
            fs::write(dir.path().join(name), b"data")?;
        }

        for stale in ["mariage-partie-1.zip", "mariage-partie-2.zip", "mariage-bis.zip"] {
            fs::write(dir.path().join(stale), b"old")?;
        }

        let outcomes = archiver(50, Compat::default())
            .archive("mariage", dir.path(), &files, None)
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());

        let mut zips = fs::read_dir(dir.path())?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|name| name.ends_with(".zip"))
            .collect::<Vec<_>>();

        zips.sort();

        assert_eq!(zips, vec!["mariage-bis.zip", "mariage.zip"]);

        Ok(())
    }
}
