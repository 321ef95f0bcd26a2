//! Filesystem-backed TM registry (spec §4.2/§6.2): a flat `nodes.txt` file
//! unioned with every regular file inside a `nodes/` directory, directory
//! entries overriding file entries on name collision. Reloaded on every
//! pusher/committer cycle.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

/// A TM endpoint, keyed by `name` in the registry map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// A `proxy <name> <protocol>:<address>:<port>` entry. Consulted only by
/// the `through` form of `node`, which is parsed but otherwise unimplemented
/// (§9: "Proxy routing is parsed but not implemented; preserve the
/// parse-and-ignore behavior").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub name: String,
    pub protocol: String,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub endpoints: HashMap<String, Endpoint>,
    pub proxies: HashMap<String, ProxyEntry>,
}

impl Registry {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn merge_from(&mut self, other: Registry) {
        for (name, endpoint) in other.endpoints {
            self.endpoints.insert(name, endpoint);
        }
        for (name, proxy) in other.proxies {
            self.proxies.insert(name, proxy);
        }
    }
}

fn parse_node_line(rest: &str) -> Option<Endpoint> {
    // `<host>:<port>` or `<host>:<port> through <proxy-name>`.
    let mut parts = rest.splitn(2, " through ");
    let hostport = parts.next()?.trim();
    let (host, port) = hostport.rsplit_once(':')?;
    let port: u16 = port.trim().parse().ok()?;
    if parts.next().is_some() {
        // Reserved `through` syntax: parsed, logged, ignored.
        info!(target: "spits_net::registry", "ignoring reserved 'through' routing for {hostport}");
    }
    Some(Endpoint {
        name: format!("{host}:{port}"),
        address: host.trim().to_string(),
        port,
    })
}

fn parse_proxy_line(rest: &str) -> Option<ProxyEntry> {
    // `<name> <protocol>:<address>:<port>`
    let (name, spec) = rest.trim().split_once(' ')?;
    let mut fields = spec.splitn(3, ':');
    let protocol = fields.next()?.to_string();
    let address = fields.next()?.to_string();
    let port: u16 = fields.next()?.trim().parse().ok()?;
    Some(ProxyEntry {
        name: name.to_string(),
        protocol,
        address,
        port,
    })
}

/// Parses one registry file's contents. Malformed `node`/`proxy` lines abort
/// parsing of the remainder of the file with a warning; lines already
/// parsed before the malformed line are kept. Any other line is ignored.
fn parse_registry_text(source: &str, text: &str) -> Registry {
    let mut registry = Registry::default();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("node ") {
            match parse_node_line(rest) {
                Some(endpoint) => {
                    registry.endpoints.insert(endpoint.name.clone(), endpoint);
                }
                None => {
                    warn!(
                        target: "spits_net::registry",
                        "malformed 'node' line in {source}:{}: {line:?}", lineno + 1
                    );
                    break;
                }
            }
        } else if let Some(rest) = line.strip_prefix("proxy ") {
            match parse_proxy_line(rest) {
                Some(proxy) => {
                    registry.proxies.insert(proxy.name.clone(), proxy);
                }
                None => {
                    warn!(
                        target: "spits_net::registry",
                        "malformed 'proxy' line in {source}:{}: {line:?}", lineno + 1
                    );
                    break;
                }
            }
        }
        // Any other line is silently ignored per spec.
    }

    registry
}

/// Loads `<base_dir>/nodes.txt` and every regular file inside
/// `<base_dir>/nodes/`, unioning them (directory entries win on collision).
/// A missing file or missing directory contributes an empty map with a
/// warning — this is *not* treated as an error.
pub fn load_registry(base_dir: &Path) -> Registry {
    let mut registry = Registry::default();

    let nodes_txt = base_dir.join("nodes.txt");
    match std::fs::read_to_string(&nodes_txt) {
        Ok(text) => registry.merge_from(parse_registry_text(&nodes_txt.display().to_string(), &text)),
        Err(_) => warn!(target: "spits_net::registry", "no nodes.txt at {}", nodes_txt.display()),
    }

    let nodes_dir = base_dir.join("nodes");
    match std::fs::read_dir(&nodes_dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(text) => registry.merge_from(parse_registry_text(
                        &path.display().to_string(),
                        &text,
                    )),
                    Err(e) => warn!(
                        target: "spits_net::registry",
                        "failed to read {}: {e}", path.display()
                    ),
                }
            }
        }
        Err(_) => warn!(target: "spits_net::registry", "no nodes/ directory at {}", nodes_dir.display()),
    }

    registry
}

/// Reload the registry for one pusher/committer cycle, applying the
/// "empty reload keeps the previous registry" rule from spec §4.5.1 step 1
/// / §4.5.2 step 1: if the freshly loaded registry is empty but the
/// previous one was not, the previous registry is retained.
pub fn reload(base_dir: &Path, previous: &Registry) -> Registry {
    let fresh = load_registry(base_dir);
    if fresh.is_empty() && !previous.is_empty() {
        previous.clone()
    } else {
        fresh
    }
}
