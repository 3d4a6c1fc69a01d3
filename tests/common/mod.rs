#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

pub const TOKEN: &str = "test-pull-token";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: Vec::new(),
        }
    }
}

/// A captured HTTP request for header inspection.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub path: String,
    pub headers: HashMap<String, String>,
}

/// Minimal registry + token service on one port.
///
/// Each route answers with its replies in turn, repeating the last one.
/// Requests to `/v2/` routes without `Authorization: Bearer TOKEN` get 401.
pub struct MockRegistry {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    _handle: std::thread::JoinHandle<()>,
}

impl MockRegistry {
    pub fn start(routes: Vec<(String, Vec<Reply>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let mut routes: HashMap<String, (Vec<Reply>, usize)> = routes
            .into_iter()
            .map(|(path, replies)| (path, (replies, 0)))
            .collect();

        let requests_clone = Arc::clone(&requests);
        let handle = std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                let target = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let mut headers = HashMap::new();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                        break;
                    }
                    if let Some((k, v)) = line.trim().split_once(": ") {
                        headers.insert(k.to_lowercase(), v.to_owned());
                    }
                }

                let path = target.split('?').next().unwrap_or("/").to_string();
                let authorized = headers.get("authorization").map(String::as_str)
                    == Some(format!("Bearer {TOKEN}").as_str());
                requests_clone.lock().unwrap().push(CapturedRequest {
                    path: target.clone(),
                    headers,
                });

                let reply = if path.starts_with("/v2/") && !authorized {
                    Reply::status(401)
                } else {
                    match routes.get_mut(&path) {
                        Some((replies, next)) => {
                            let reply = replies[(*next).min(replies.len() - 1)].clone();
                            *next += 1;
                            reply
                        }
                        None => Reply::status(404),
                    }
                };

                let head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.status,
                    if reply.status == 200 { "OK" } else { "Error" },
                    reply.content_type,
                    reply.body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&reply.body);
                let _ = stream.flush();
            }
        });

        Self {
            url,
            requests,
            _handle: handle,
        }
    }

    pub fn captured_requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn sha256(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

pub fn token_reply() -> Reply {
    Reply::ok(
        "application/json",
        format!(r#"{{"token":"{TOKEN}","access_token":"{TOKEN}","expires_in":300}}"#),
    )
}

pub fn gz_layer(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn image_manifest(layers: &[&[u8]]) -> String {
    let layers: Vec<String> = layers
        .iter()
        .map(|data| {
            format!(
                r#"{{"mediaType":"application/vnd.docker.image.rootfs.diff.tar.gzip","size":{},"digest":"{}"}}"#,
                data.len(),
                sha256(data)
            )
        })
        .collect();
    format!(
        r#"{{"schemaVersion":2,"mediaType":"{DOCKER_MANIFEST}",
            "config":{{"mediaType":"application/vnd.docker.container.image.v1+json","size":2,"digest":"{}"}},
            "layers":[{}]}}"#,
        sha256(b"{}"),
        layers.join(",")
    )
}

pub fn index_for(entries: &[(&str, &str, &str)]) -> String {
    let manifests: Vec<String> = entries
        .iter()
        .map(|(digest, os, arch)| {
            format!(
                r#"{{"mediaType":"{DOCKER_MANIFEST}","digest":"{digest}","size":1,"platform":{{"os":"{os}","architecture":"{arch}"}}}}"#
            )
        })
        .collect();
    format!(
        r#"{{"schemaVersion":2,"mediaType":"{OCI_INDEX}","manifests":[{}]}}"#,
        manifests.join(",")
    )
}

/// Routes serving `repository:tag` as a single-platform image built from `layers`.
pub fn image_routes(repository: &str, tag: &str, layers: &[Vec<u8>]) -> Vec<(String, Vec<Reply>)> {
    let refs: Vec<&[u8]> = layers.iter().map(Vec::as_slice).collect();
    let mut routes = vec![
        ("/token".to_string(), vec![token_reply()]),
        (
            format!("/v2/{repository}/manifests/{tag}"),
            vec![Reply::ok(DOCKER_MANIFEST, image_manifest(&refs))],
        ),
    ];
    for layer in layers {
        routes.push((
            format!("/v2/{repository}/blobs/{}", sha256(layer)),
            vec![Reply::ok("application/octet-stream", layer.clone())],
        ));
    }
    routes
}
