#![allow(dead_code)]

use recon_core::fetch::{DumpClient, FetchError};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Minimal HTTP/1.1 responder: exact path -> (status, body), everything
/// else 404. One request per connection.
pub struct TestServer {
  pub base: String,
  hits: Arc<Mutex<Vec<String>>>,
  stop: Arc<AtomicBool>,
  addr: std::net::SocketAddr,
  handle: Option<JoinHandle<()>>,
}

impl TestServer {
  pub fn start(routes: Vec<(&str, u16, &[u8])>) -> Self {
    let routes: HashMap<String, (u16, Vec<u8>)> = routes
      .into_iter()
      .map(|(p, s, b)| (p.to_string(), (s, b.to_vec())))
      .collect();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(Mutex::new(Vec::new()));
    let stop = Arc::new(AtomicBool::new(false));

    let thread_hits = hits.clone();
    let thread_stop = stop.clone();
    let handle = std::thread::spawn(move || {
      for stream in listener.incoming() {
        if thread_stop.load(Ordering::SeqCst) {
          break;
        }
        let Ok(stream) = stream else { continue };
        handle_connection(stream, &routes, &thread_hits);
      }
    });

    Self {
      base: format!("http://{addr}"),
      hits,
      stop,
      addr,
      handle: Some(handle),
    }
  }

  pub fn url(&self, path: &str) -> String {
    format!("{}{path}", self.base)
  }

  pub fn hits(&self) -> Vec<String> {
    self.hits.lock().unwrap().clone()
  }
}

impl Drop for TestServer {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::SeqCst);
    let _ = TcpStream::connect(self.addr);
    if let Some(h) = self.handle.take() {
      let _ = h.join();
    }
  }
}

fn handle_connection(
  mut stream: TcpStream,
  routes: &HashMap<String, (u16, Vec<u8>)>,
  hits: &Mutex<Vec<String>>,
) {
  let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
  let mut head = Vec::new();
  let mut buf = [0u8; 1024];
  while !head.windows(4).any(|w| w == b"\r\n\r\n") {
    match stream.read(&mut buf) {
      Ok(0) | Err(_) => return,
      Ok(n) => head.extend_from_slice(&buf[..n]),
    }
  }

  let text = String::from_utf8_lossy(&head);
  let path = text
    .lines()
    .next()
    .and_then(|l| l.split_whitespace().nth(1))
    .unwrap_or("/")
    .to_string();
  hits.lock().unwrap().push(path.clone());

  let (status, body) = routes
    .get(&path)
    .cloned()
    .unwrap_or((404, b"not found".to_vec()));
  let reason = match status {
    200 => "OK",
    404 => "Not Found",
    503 => "Service Unavailable",
    _ => "Status",
  };
  let header = format!(
    "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
    body.len()
  );
  let _ = stream.write_all(header.as_bytes());
  let _ = stream.write_all(&body);
  let _ = stream.flush();
}

/// In-memory dump client keyed by URL; unknown URLs fail to connect.
#[derive(Default)]
pub struct MapClient {
  bodies: HashMap<String, Vec<u8>>,
  calls: Mutex<Vec<String>>,
}

impl MapClient {
  pub fn with(mut self, url: &str, body: &str) -> Self {
    self.bodies.insert(url.to_string(), body.as_bytes().to_vec());
    self
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl DumpClient for MapClient {
  fn download(&self, url: &str, out: &mut dyn Write) -> Result<u64, FetchError> {
    self.calls.lock().unwrap().push(url.to_string());
    match self.bodies.get(url) {
      Some(body) => {
        out.write_all(body).map_err(|e| FetchError::Transport {
          url: url.to_string(),
          reason: e.to_string(),
        })?;
        Ok(body.len() as u64)
      }
      None => Err(FetchError::Connect {
        url: url.to_string(),
      }),
    }
  }
}

pub const RIPE_DUMP: &str = "\
% excerpt

inetnum:  193.0.0.0 - 193.0.7.255
netname:  EXAMPLE-NET
descr:    ExampleOrg Holdings LLC

inetnum:  203.0.113.0 - 203.0.113.255
descr:    Unrelated Hosting

inetnum:  this is - broken
descr:    ExampleOrg broken entry
";

pub const APNIC_DUMP: &str = "\
inet6num: 2001:db8:100::/40
descr:    ExampleOrgAsia Pte
";

pub const RADB_DUMP: &str = "\
route:    192.0.2.0/24
descr:    ExampleOrg transit
origin:   AS64500

route:    198.18.0.0/15
descr:    Benchmarking
origin:   AS64501
";
