use std::collections::HashMap;
use std::io;
use std::path::Path;

use tracing::{info, warn};

use adx_types::DspInfo;

/// Persists the definition map so a restart can serve from the last
/// known set before the first object-store scan completes.
pub fn save_snapshot(path: &Path, definitions: &HashMap<String, DspInfo>) -> io::Result<()> {
    let bytes = serde_json::to_vec(definitions)?;

    // Write-then-rename so a crash never leaves a torn snapshot.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;

    info!("saved index snapshot: {} documents to {:?}", definitions.len(), path);
    Ok(())
}

/// Best-effort load. Any failure returns `None`; the caller rebuilds
/// from the object store instead.
pub fn load_snapshot(path: &Path) -> Option<HashMap<String, DspInfo>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("failed to read index snapshot {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(defs) => Some(defs),
        Err(e) => {
            warn!("failed to parse index snapshot {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dsp(id: &str) -> DspInfo {
        serde_json::from_str(&format!(
            r#"{{"dsp_id": "{id}", "endpoint": "http://{id}", "status": "active"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn roundtrips_definition_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsp_index.dat");

        let mut defs = HashMap::new();
        defs.insert("a".to_string(), dsp("a"));
        defs.insert("b".to_string(), dsp("b"));

        save_snapshot(&path, &defs).unwrap();
        let back = load_snapshot(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back["a"].endpoint, "http://a");
    }

    #[test]
    fn missing_or_corrupt_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsp_index.dat");
        assert!(load_snapshot(&path).is_none());

        std::fs::write(&path, b"garbage").unwrap();
        assert!(load_snapshot(&path).is_none());
    }
}
