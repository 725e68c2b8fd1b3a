//! Small filesystem helpers shared by the build pipelines

use std::path::Path;

use pdibuild_core::Result;

/// Copy a directory tree.
pub fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let source_path = entry.path();
        let target_path = target.join(entry.file_name());
        if source_path.is_dir() {
            copy_tree(&source_path, &target_path)?;
        } else {
            std::fs::copy(&source_path, &target_path)?;
        }
    }
    Ok(())
}

/// Move every regular file at the top of `source` into `target`.
pub fn move_top_files(source: &Path, target: &Path) -> Result<()> {
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            let dest = target.join(entry.file_name());
            if std::fs::rename(&path, &dest).is_err() {
                std::fs::copy(&path, &dest)?;
                std::fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree_recurses() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub/inner")).unwrap();
        std::fs::write(src.path().join("a"), b"a").unwrap();
        std::fs::write(src.path().join("sub/inner/b"), b"b").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("copy");
        copy_tree(src.path(), &target).unwrap();

        assert_eq!(std::fs::read(target.join("a")).unwrap(), b"a");
        assert_eq!(std::fs::read(target.join("sub/inner/b")).unwrap(), b"b");
    }

    #[test]
    fn test_move_top_files_leaves_directories() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("tree")).unwrap();
        std::fs::write(src.path().join("artifact.deb"), b"deb").unwrap();
        std::fs::write(src.path().join("tree/nested"), b"n").unwrap();

        let dst = tempfile::tempdir().unwrap();
        move_top_files(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("artifact.deb").exists());
        assert!(!src.path().join("artifact.deb").exists());
        assert!(src.path().join("tree/nested").exists());
        assert!(!dst.path().join("tree").exists());
    }
}
