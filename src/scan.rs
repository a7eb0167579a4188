use anyhow::Result;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

/// Jars below `base_path`, sorted. A path that is itself a jar is returned as is.
pub fn scan_jars(base_path: &Path) -> Result<Vec<PathBuf>> {
    if base_path.is_file() {
        anyhow::ensure!(
            is_jar(base_path),
            "Not a jar or directory: {}",
            base_path.display()
        );
        return Ok(vec![base_path.to_path_buf()]);
    }
    anyhow::ensure!(
        base_path.is_dir(),
        "Dependency path does not exist: {}",
        base_path.display()
    );

    let (tx, rx) = mpsc::channel();

    let walker = WalkBuilder::new(base_path)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build_parallel();

    walker.run(|| {
        let tx = tx.clone();
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                let path = entry.path();
                if path.is_file() && is_jar(path) {
                    let _ = tx.send(path.to_path_buf());
                }
            }
            ignore::WalkState::Continue
        })
    });

    drop(tx);
    let mut jars: Vec<PathBuf> = rx.iter().collect();
    jars.sort();
    Ok(jars)
}

fn is_jar(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "jar")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn scan_jars_finds_nested_jars_in_order() {
        let base = temp_dir("entity-scan-deps");
        fs::create_dir_all(base.join("b/c")).unwrap();
        fs::write(base.join("b/c/z.jar"), b"").unwrap();
        fs::write(base.join("a.jar"), b"").unwrap();
        fs::write(base.join("b/readme.txt"), b"").unwrap();

        let jars = scan_jars(&base).unwrap();
        assert_eq!(jars, vec![base.join("a.jar"), base.join("b/c/z.jar")]);

        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn scan_jars_accepts_single_jar_and_rejects_missing() {
        let base = temp_dir("entity-scan-single");
        fs::create_dir_all(&base).unwrap();
        let jar = base.join("one.jar");
        fs::write(&jar, b"").unwrap();

        assert_eq!(scan_jars(&jar).unwrap(), vec![jar.clone()]);
        assert!(scan_jars(&base.join("missing")).is_err());

        fs::remove_dir_all(base).unwrap();
    }
}
