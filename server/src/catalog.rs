//! Persistent catalog of pictures and reviews.

use {
    anyhow::{anyhow, Result},
    async_trait::async_trait,
    lightbox_shared::{CaptureTimestamp, PictureFields, PictureRecord, Review, ReviewPictureRecord},
    sqlx::{
        sqlite::{SqliteConnectOptions, SqliteRow},
        ConnectOptions, Connection, Row, SqliteConnection,
    },
    std::ops::DerefMut,
    tokio::sync::Mutex as AsyncMutex,
};

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Insert a picture, returning its id.  Fails if a picture with the same path already exists.
    async fn insert_picture(&self, path: &str, fields: &PictureFields) -> Result<i64>;

    async fn picture_by_path(&self, path: &str) -> Result<Option<PictureRecord>>;

    /// All pictures, most recently taken first
    async fn pictures(&self) -> Result<Vec<PictureRecord>>;

    async fn delete_picture(&self, id: i64) -> Result<()>;

    async fn set_starred(&self, id: i64, starred: bool) -> Result<()>;

    async fn set_species(&self, id: i64, species_id: Option<i64>) -> Result<()>;

    async fn pictures_by_species(&self, species_id: i64) -> Result<Vec<PictureRecord>>;

    /// Look up a review and its pictures, ordered by name.
    async fn review(&self, name: &str) -> Result<Option<Review>>;

    async fn reviews(&self) -> Result<Vec<Review>>;

    async fn create_review(&self, name: &str, password: &str) -> Result<i64>;

    /// Delete a review along with its picture records.
    async fn delete_review(&self, name: &str) -> Result<()>;

    async fn insert_review_picture(&self, picture: &ReviewPictureRecord) -> Result<()>;

    async fn review_picture(&self, review: &str, name: &str)
        -> Result<Option<ReviewPictureRecord>>;

    /// Replace the hash of a review picture, leaving everything else untouched.
    async fn update_review_picture_hash(&self, review: &str, name: &str, hash: &str) -> Result<()>;

    async fn set_review_picture_status(&self, review: &str, name: &str, status: i64) -> Result<()>;

    async fn set_review_picture_comment(&self, review: &str, name: &str, comment: &str)
        -> Result<()>;
}

const PICTURE_COLUMNS: &str = "id, path, datetime, timestamp, camera, lens, mode, aperture, iso, exposure, \
                               focal, flash, width, height, landscape, note, starred, blurred, species_id";

const REVIEW_PICTURE_COLUMNS: &str =
    "path, name, hash, review_id, review_name, landscape, status, comment";

fn dimension(row: &SqliteRow, column: &str) -> Result<u32> {
    let value = row.try_get::<i64, _>(column)?;

    u32::try_from(value).map_err(|_| anyhow!("invalid {} in catalog: {}", column, value))
}

fn picture_from_row(row: &SqliteRow) -> Result<PictureRecord> {
    Ok(PictureRecord {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        fields: PictureFields {
            timestamp: CaptureTimestamp {
                calendar: row.try_get("datetime")?,
                epoch: row.try_get("timestamp")?,
            },
            camera: row.try_get("camera")?,
            lens: row.try_get("lens")?,
            exposure_mode: row.try_get("mode")?,
            aperture: row.try_get("aperture")?,
            iso: row.try_get("iso")?,
            exposure_time: row.try_get("exposure")?,
            focal_length: row.try_get("focal")?,
            flash: row.try_get("flash")?,
            width: dimension(row, "width")?,
            height: dimension(row, "height")?,
            landscape: row.try_get("landscape")?,
            note: row.try_get("note")?,
        },
        starred: row.try_get("starred")?,
        blurred: row.try_get("blurred")?,
        species_id: row.try_get("species_id")?,
    })
}

fn review_picture_from_row(row: &SqliteRow) -> Result<ReviewPictureRecord> {
    Ok(ReviewPictureRecord {
        path: row.try_get("path")?,
        name: row.try_get("name")?,
        hash: row.try_get("hash")?,
        review_id: row.try_get("review_id")?,
        review_name: row.try_get("review_name")?,
        landscape: row.try_get("landscape")?,
        status: row.try_get("status")?,
        comment: row.try_get("comment")?,
    })
}

/// Reported when an update or deletion names a record which does not exist
#[derive(Debug, thiserror::Error)]
#[error("no such {what}: {key}")]
pub struct NotFound {
    pub what: &'static str,
    pub key: String,
}

fn ensure_changed(rows: u64, what: &'static str, key: &str) -> Result<()> {
    if rows == 0 {
        Err(NotFound {
            what,
            key: key.to_owned(),
        }
        .into())
    } else {
        Ok(())
    }
}

/// [Catalog] stored in a SQLite database
pub struct SqliteCatalog {
    conn: AsyncMutex<SqliteConnection>,
}

impl SqliteCatalog {
    /// Open (creating if necessary) the database in `state_file` and apply the schema.
    pub async fn open(state_file: &str) -> Result<Self> {
        Self::with_options(
            format!("sqlite://{}", state_file)
                .parse::<SqliteConnectOptions>()?
                .create_if_missing(true),
        )
        .await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        Self::with_options("sqlite::memory:".parse::<SqliteConnectOptions>()?).await
    }

    async fn with_options(options: SqliteConnectOptions) -> Result<Self> {
        let mut conn = options.foreign_keys(true).connect().await?;

        for statement in schema::DDL_STATEMENTS {
            sqlx::query(statement).execute(&mut conn).await?;
        }

        Ok(Self {
            conn: AsyncMutex::new(conn),
        })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.into_inner().close().await?;

        Ok(())
    }

    async fn review_pictures(
        conn: &mut SqliteConnection,
        review: &str,
    ) -> Result<Vec<ReviewPictureRecord>> {
        sqlx::query(&format!(
            "SELECT {} FROM review_pictures WHERE review_name = ?1 ORDER BY name",
            REVIEW_PICTURE_COLUMNS
        ))
        .bind(review)
        .fetch_all(conn)
        .await?
        .iter()
        .map(review_picture_from_row)
        .collect()
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn insert_picture(&self, path: &str, fields: &PictureFields) -> Result<i64> {
        Ok(sqlx::query(
            "INSERT INTO pictures \
             (path, datetime, timestamp, camera, lens, mode, aperture, iso, exposure, focal, flash, width, \
              height, landscape, note) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(path)
        .bind(&fields.timestamp.calendar)
        .bind(fields.timestamp.epoch)
        .bind(&fields.camera)
        .bind(&fields.lens)
        .bind(&fields.exposure_mode)
        .bind(&fields.aperture)
        .bind(&fields.iso)
        .bind(&fields.exposure_time)
        .bind(&fields.focal_length)
        .bind(&fields.flash)
        .bind(i64::from(fields.width))
        .bind(i64::from(fields.height))
        .bind(fields.landscape)
        .bind(&fields.note)
        .execute(self.conn.lock().await.deref_mut())
        .await?
        .last_insert_rowid())
    }

    async fn picture_by_path(&self, path: &str) -> Result<Option<PictureRecord>> {
        sqlx::query(&format!(
            "SELECT {} FROM pictures WHERE path = ?1",
            PICTURE_COLUMNS
        ))
        .bind(path)
        .fetch_optional(self.conn.lock().await.deref_mut())
        .await?
        .as_ref()
        .map(picture_from_row)
        .transpose()
    }

    async fn pictures(&self) -> Result<Vec<PictureRecord>> {
        sqlx::query(&format!(
            "SELECT {} FROM pictures ORDER BY timestamp DESC, id",
            PICTURE_COLUMNS
        ))
        .fetch_all(self.conn.lock().await.deref_mut())
        .await?
        .iter()
        .map(picture_from_row)
        .collect()
    }

    async fn delete_picture(&self, id: i64) -> Result<()> {
        let rows = sqlx::query("DELETE FROM pictures WHERE id = ?1")
            .bind(id)
            .execute(self.conn.lock().await.deref_mut())
            .await?
            .rows_affected();

        ensure_changed(rows, "picture", &id.to_string())
    }

    async fn set_starred(&self, id: i64, starred: bool) -> Result<()> {
        let rows = sqlx::query("UPDATE pictures SET starred = ?1 WHERE id = ?2")
            .bind(starred)
            .bind(id)
            .execute(self.conn.lock().await.deref_mut())
            .await?
            .rows_affected();

        ensure_changed(rows, "picture", &id.to_string())
    }

    async fn set_species(&self, id: i64, species_id: Option<i64>) -> Result<()> {
        let rows = sqlx::query("UPDATE pictures SET species_id = ?1 WHERE id = ?2")
            .bind(species_id)
            .bind(id)
            .execute(self.conn.lock().await.deref_mut())
            .await?
            .rows_affected();

        ensure_changed(rows, "picture", &id.to_string())
    }

    async fn pictures_by_species(&self, species_id: i64) -> Result<Vec<PictureRecord>> {
        sqlx::query(&format!(
            "SELECT {} FROM pictures WHERE species_id = ?1 ORDER BY timestamp DESC, id",
            PICTURE_COLUMNS
        ))
        .bind(species_id)
        .fetch_all(self.conn.lock().await.deref_mut())
        .await?
        .iter()
        .map(picture_from_row)
        .collect()
    }

    async fn review(&self, name: &str) -> Result<Option<Review>> {
        let mut conn = self.conn.lock().await;

        let row = sqlx::query("SELECT id, name, password FROM reviews WHERE name = ?1")
            .bind(name)
            .fetch_optional(conn.deref_mut())
            .await?;

        Ok(if let Some(row) = row {
            Some(Review {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                password: row.try_get("password")?,
                pictures: Self::review_pictures(conn.deref_mut(), name).await?,
            })
        } else {
            None
        })
    }

    async fn reviews(&self) -> Result<Vec<Review>> {
        let mut conn = self.conn.lock().await;

        let rows = sqlx::query("SELECT id, name, password FROM reviews ORDER BY name")
            .fetch_all(conn.deref_mut())
            .await?;

        let mut reviews = Vec::with_capacity(rows.len());

        for row in rows {
            let name = row.try_get::<String, _>("name")?;

            reviews.push(Review {
                id: row.try_get("id")?,
                password: row.try_get("password")?,
                pictures: Self::review_pictures(conn.deref_mut(), &name).await?,
                name,
            });
        }

        Ok(reviews)
    }

    async fn create_review(&self, name: &str, password: &str) -> Result<i64> {
        Ok(
            sqlx::query("INSERT INTO reviews (name, password) VALUES (?1, ?2)")
                .bind(name)
                .bind(password)
                .execute(self.conn.lock().await.deref_mut())
                .await?
                .last_insert_rowid(),
        )
    }

    async fn delete_review(&self, name: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let mut tx = conn.begin().await?;

        sqlx::query("DELETE FROM review_pictures WHERE review_name = ?1")
            .bind(name)
            .execute(&mut tx)
            .await?;

        let rows = sqlx::query("DELETE FROM reviews WHERE name = ?1")
            .bind(name)
            .execute(&mut tx)
            .await?
            .rows_affected();

        ensure_changed(rows, "review", name)?;

        tx.commit().await?;

        Ok(())
    }

    async fn insert_review_picture(&self, picture: &ReviewPictureRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO review_pictures ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            REVIEW_PICTURE_COLUMNS
        ))
        .bind(&picture.path)
        .bind(&picture.name)
        .bind(&picture.hash)
        .bind(picture.review_id)
        .bind(&picture.review_name)
        .bind(picture.landscape)
        .bind(picture.status)
        .bind(&picture.comment)
        .execute(self.conn.lock().await.deref_mut())
        .await?;

        Ok(())
    }

    async fn review_picture(
        &self,
        review: &str,
        name: &str,
    ) -> Result<Option<ReviewPictureRecord>> {
        sqlx::query(&format!(
            "SELECT {} FROM review_pictures WHERE review_name = ?1 AND name = ?2",
            REVIEW_PICTURE_COLUMNS
        ))
        .bind(review)
        .bind(name)
        .fetch_optional(self.conn.lock().await.deref_mut())
        .await?
        .as_ref()
        .map(review_picture_from_row)
        .transpose()
    }

    async fn update_review_picture_hash(&self, review: &str, name: &str, hash: &str) -> Result<()> {
        let rows =
            sqlx::query("UPDATE review_pictures SET hash = ?1 WHERE review_name = ?2 AND name = ?3")
                .bind(hash)
                .bind(review)
                .bind(name)
                .execute(self.conn.lock().await.deref_mut())
                .await?
                .rows_affected();

        ensure_changed(rows, "review picture", name)
    }

    async fn set_review_picture_status(&self, review: &str, name: &str, status: i64) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE review_pictures SET status = ?1 WHERE review_name = ?2 AND name = ?3",
        )
        .bind(status)
        .bind(review)
        .bind(name)
        .execute(self.conn.lock().await.deref_mut())
        .await?
        .rows_affected();

        ensure_changed(rows, "review picture", name)
    }

    async fn set_review_picture_comment(
        &self,
        review: &str,
        name: &str,
        comment: &str,
    ) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE review_pictures SET comment = ?1 WHERE review_name = ?2 AND name = ?3",
        )
        .bind(comment)
        .bind(review)
        .bind(name)
        .execute(self.conn.lock().await.deref_mut())
        .await?
        .rows_affected();

        ensure_changed(rows, "review picture", name)
    }
}
