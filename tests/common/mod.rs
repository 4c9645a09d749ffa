//! Shared fixtures: a seekable-zstd writer, SQLite database builders, and
//! a minimal HTTP server that honors Range requests.
#![allow(dead_code)] // not every test binary uses every fixture

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use byteorder::{LittleEndian, WriteBytesExt};
use rusqlite::Connection;
use tiny_http::{Header, Method, Request, Response, Server};
use xxhash_rust::xxh64::xxh64;

const SKIPPABLE_FRAME_MAGIC: u32 = 0x184D2A5E;
const SEEK_TABLE_FOOTER_MAGIC: u32 = 0x8F92EAB1;

/// Decompressed bytes per frame in compressed fixtures. Small enough that
/// even the 1000-row database spans several frames.
pub const FIXTURE_FRAME_SIZE: usize = 16 * 1024;

/// Compress `data` into a seekable-zstd stream: one standard zstd frame
/// per chunk, followed by the seek-table skippable frame. Checksums are
/// the low 32 bits of each frame's XXH64.
pub fn seekable_compress(data: &[u8], frame_size: usize, checksums: bool) -> Vec<u8> {
    let mut out = Vec::new();
    let mut entries = Vec::new();
    for chunk in data.chunks(frame_size) {
        let frame = zstd::encode_all(chunk, 3).unwrap();
        entries.push((frame.len() as u32, chunk.len() as u32, xxh64(chunk, 0) as u32));
        out.extend_from_slice(&frame);
    }

    let entry_size: u32 = if checksums { 12 } else { 8 };
    out.write_u32::<LittleEndian>(SKIPPABLE_FRAME_MAGIC).unwrap();
    out.write_u32::<LittleEndian>(entry_size * entries.len() as u32 + 9)
        .unwrap();
    for &(compressed, logical, sum) in &entries {
        out.write_u32::<LittleEndian>(compressed).unwrap();
        out.write_u32::<LittleEndian>(logical).unwrap();
        if checksums {
            out.write_u32::<LittleEndian>(sum).unwrap();
        }
    }
    out.write_u32::<LittleEndian>(entries.len() as u32).unwrap();
    out.write_u8(if checksums { 0x80 } else { 0 }).unwrap();
    out.write_u32::<LittleEndian>(SEEK_TABLE_FOOTER_MAGIC)
        .unwrap();
    out
}

/// Compress an on-disk file next to itself with a `.zst` suffix.
pub fn compress_file(path: &Path) -> PathBuf {
    let data = fs::read(path).unwrap();
    let compressed = seekable_compress(&data, FIXTURE_FRAME_SIZE, true);
    let out_path = PathBuf::from(format!("{}.zst", path.display()));
    let mut out = fs::File::create(&out_path).unwrap();
    out.write_all(&compressed).unwrap();
    out.sync_all().unwrap();
    out_path
}

/// Build the canonical fixture: a single `entries` table holding the ids
/// 1..=1000. Returns the path to the compressed copy.
pub fn build_entries_db(dir: &Path) -> PathBuf {
    let db_path = dir.join("test.sqlite");
    let mut conn = Connection::open(&db_path).unwrap();
    conn.execute("CREATE TABLE entries (id INTEGER PRIMARY KEY)", [])
        .unwrap();
    let tx = conn.transaction().unwrap();
    for id in 1..=1000 {
        tx.execute("INSERT INTO entries (id) VALUES (?1)", [id]).unwrap();
    }
    tx.commit().unwrap();
    drop(conn);
    compress_file(&db_path)
}

/// Build a two-table users/orders fixture with 10000 rows each. Returns
/// `(raw, compressed)` paths so tests can compare both sides.
pub fn build_complex_db(dir: &Path) -> (PathBuf, PathBuf) {
    let db_path = dir.join("complex.sqlite");
    let mut conn = Connection::open(&db_path).unwrap();
    conn.execute_batch(
        "CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            name TEXT,
            age INTEGER
        );
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            user_id INTEGER,
            product TEXT,
            quantity INTEGER,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );",
    )
    .unwrap();
    let tx = conn.transaction().unwrap();
    for i in 1..=10_000i64 {
        tx.execute(
            "INSERT INTO users (name, age) VALUES (?1, ?2)",
            rusqlite::params![format!("User{i}"), 20 + (i % 60)],
        )
        .unwrap();
        tx.execute(
            "INSERT INTO orders (user_id, product, quantity) VALUES (?1, ?2, ?3)",
            rusqlite::params![i, format!("Product{}", i % 100), i % 10 + 1],
        )
        .unwrap();
    }
    tx.commit().unwrap();
    drop(conn);
    let compressed = compress_file(&db_path);
    (db_path, compressed)
}

/// Build a fixture exercising virtual tables: an R-tree of bounding boxes
/// and an FTS5 index over generated prose. Returns `(raw, compressed)`.
pub fn build_virtual_table_db(dir: &Path) -> (PathBuf, PathBuf) {
    let db_path = dir.join("virtual.sqlite");
    let mut conn = Connection::open(&db_path).unwrap();
    conn.execute_batch(
        "CREATE VIRTUAL TABLE places USING rtree(id, min_x, max_x, min_y, max_y);
         CREATE VIRTUAL TABLE notes USING fts5(body);",
    )
    .unwrap();
    let tx = conn.transaction().unwrap();
    for i in 0..500i64 {
        let x = (i % 25) as f64 * 4.0;
        let y = (i / 25) as f64 * 4.0;
        tx.execute(
            "INSERT INTO places (id, min_x, max_x, min_y, max_y) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![i, x, x + 2.0, y, y + 2.0],
        )
        .unwrap();
        let word = ["alpha", "beta", "gamma", "delta"][i as usize % 4];
        tx.execute(
            "INSERT INTO notes (body) VALUES (?1)",
            [format!("note {i} mentions {word} and nothing else")],
        )
        .unwrap();
    }
    tx.commit().unwrap();
    drop(conn);
    let compressed = compress_file(&db_path);
    (db_path, compressed)
}

/// Serve a directory over HTTP with Range support, on an ephemeral port.
/// Returns the base URL; the server thread lives for the whole test run.
pub fn serve_directory(root: PathBuf) -> String {
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let _ = handle_request(&root, request);
        }
    });
    format!("http://127.0.0.1:{port}")
}

fn handle_request(root: &Path, request: Request) -> std::io::Result<()> {
    let path = root.join(request.url().trim_start_matches('/'));
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(_) => return request.respond(Response::empty(404)),
    };

    let range = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Range"))
        .and_then(|h| parse_range(h.value.as_str(), data.len() as u64));

    match *request.method() {
        Method::Head => request.respond(
            Response::empty(200)
                .with_header(Header::from_bytes(&b"Accept-Ranges"[..], &b"bytes"[..]).unwrap()),
        ),
        Method::Get => match range {
            Some((start, end)) if start < data.len() as u64 => {
                let end = end.min(data.len() as u64 - 1);
                let body = data[start as usize..=end as usize].to_vec();
                let content_range = format!("bytes {start}-{end}/{}", data.len());
                request.respond(
                    Response::from_data(body).with_status_code(206).with_header(
                        Header::from_bytes(&b"Content-Range"[..], content_range.as_bytes())
                            .unwrap(),
                    ),
                )
            }
            Some(_) => request.respond(Response::empty(416)),
            None => request.respond(Response::from_data(data)),
        },
        _ => request.respond(Response::empty(405)),
    }
}

/// Parse `bytes=a-b` (end optional) into an inclusive pair.
fn parse_range(value: &str, size: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() {
        size.saturating_sub(1)
    } else {
        end.parse().ok()?
    };
    (start <= end).then_some((start, end))
}
