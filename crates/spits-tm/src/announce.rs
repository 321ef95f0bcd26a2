//! The TM-side publisher: writes this TM's reachable address into the
//! shared registry (spec §2 item 8, §6.2).

use std::io::Write;
use std::path::Path;

use spits_core::Announce;
use tracing::info;

/// Publishes `<host>:<port>` into the registry rooted at `base_dir`,
/// according to `mode`. `None` is a no-op (the default — discovery relies
/// on an externally managed registry).
pub fn announce(base_dir: &Path, mode: Announce, host: &str, port: u16) -> std::io::Result<()> {
    let line = format!("node {host}:{port}\n");

    match mode {
        Announce::None => Ok(()),
        Announce::CatNodes => {
            let path = base_dir.join("nodes.txt");
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(line.as_bytes())?;
            info!(path = %path.display(), "announced TM by appending to nodes.txt");
            Ok(())
        }
        Announce::File => {
            let dir = base_dir.join("nodes");
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(uuid::Uuid::new_v4().to_string());
            std::fs::write(&path, &line)?;
            info!(path = %path.display(), "announced TM by writing a registry file");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cat_nodes_appends_a_line() {
        let dir = tempfile::tempdir().unwrap();
        announce(dir.path(), Announce::CatNodes, "10.0.0.1", 9000).unwrap();
        announce(dir.path(), Announce::CatNodes, "10.0.0.2", 9001).unwrap();
        let contents = std::fs::read_to_string(dir.path().join("nodes.txt")).unwrap();
        assert_eq!(
            contents,
            "node 10.0.0.1:9000\nnode 10.0.0.2:9001\n"
        );
    }

    #[test]
    fn file_mode_writes_a_unique_file() {
        let dir = tempfile::tempdir().unwrap();
        announce(dir.path(), Announce::File, "10.0.0.1", 9000).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("nodes"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn none_mode_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        announce(dir.path(), Announce::None, "10.0.0.1", 9000).unwrap();
        assert!(!dir.path().join("nodes.txt").exists());
        assert!(!dir.path().join("nodes").exists());
    }
}
