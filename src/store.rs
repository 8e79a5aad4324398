use std::{ fs, path::Path };

use itertools::Itertools;
use parking_lot::Mutex;
use rusqlite::{ params, Connection, OptionalExtension };

use crate::error::{ GanError, Result };


const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS gifs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  parameters TEXT NOT NULL,
  image_path TEXT NOT NULL
)";


/// Records of generated images and the parameters they were generated from.

#[derive(Debug)]
pub struct GifStore {
  conn: Mutex<Connection>,
}

impl GifStore {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty() ) {
      fs::create_dir_all(parent)?;
    }
    Self::init(Connection::open(path)?)
  }

  pub fn in_memory() -> Result<Self> {
    Self::init(Connection::open_in_memory()?)
  }

  fn init(conn: Connection) -> Result<Self> {
    conn.execute(SCHEMA, [])?;
    Ok(Self { conn: Mutex::new(conn) })
  }

  pub fn save_gif(&self, parameters: &[f32], image_path: &str) -> Result<i64> {
    let conn = self.conn.lock();
    conn.execute(
      "INSERT INTO gifs (parameters, image_path) VALUES (?1, ?2)",
      params![encode_parameters(parameters), image_path],
    )?;
    Ok(conn.last_insert_rowid())
  }

  /// Insert a record whose image path depends on its id.
  ///
  /// `write` receives the new id and returns the path of the image it wrote.
  /// If it fails, no record is kept.

  pub fn save_gif_with<F>(&self, parameters: &[f32], write: F) -> Result<i64>
  where
    F: FnOnce(i64) -> Result<String>,
  {
    let mut conn = self.conn.lock();
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT INTO gifs (parameters, image_path) VALUES (?1, '')",
      params![encode_parameters(parameters)],
    )?;
    let id = tx.last_insert_rowid();
    let image_path = write(id)?;
    tx.execute("UPDATE gifs SET image_path = ?1 WHERE id = ?2", params![image_path, id])?;
    tx.commit()?;
    Ok(id)
  }

  /// Image path of record `id`, if there is one.

  pub fn get_gif(&self, id: i64) -> Result<Option<String>> {
    let conn = self.conn.lock();
    let path = conn
      .query_row("SELECT image_path FROM gifs WHERE id = ?1", [id], |row| row.get(0) )
      .optional()?;
    Ok(path)
  }

  pub fn parameters(&self, id: i64) -> Result<Option<Vec<f32>>> {
    let conn = self.conn.lock();
    let text: Option<String> = conn
      .query_row("SELECT parameters FROM gifs WHERE id = ?1", [id], |row| row.get(0) )
      .optional()?;
    text.map(|text| decode_parameters(&text)).transpose()
  }

  pub fn count(&self) -> Result<i64> {
    let conn = self.conn.lock();
    Ok(conn.query_row("SELECT COUNT(*) FROM gifs", [], |row| row.get(0) )?)
  }
}

fn encode_parameters(parameters: &[f32]) -> String {
  parameters.iter().join(",")
}

fn decode_parameters(text: &str) -> Result<Vec<f32>> {
  if text.is_empty() { return Ok(vec![]) }
  text.split(',')
    .map(|value| value.parse()
      .map_err(|e| GanError::Data(format!("stored parameter {value:?}: {e}")) ))
    .collect()
}
