//! Per-execution context and working directory handling

use std::io::Cursor;
use std::path::{Path, PathBuf};

use agora_common::{JudgeError, JudgeResult, Submission, SubmissionId};
use tempfile::TempDir;
use tokio::fs;

/// Everything a strategy needs for one execution.
///
/// Owns a freshly created working directory, removed when the context is dropped.
#[derive(Debug)]
pub struct ExecutionContext<I> {
    pub submission_id: SubmissionId,
    pub code: String,
    pub file_content: Option<Vec<u8>>,
    pub input: I,
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
    work_dir: TempDir,
}

impl<I> ExecutionContext<I> {
    /// Build a context for `submission`, allocating a new directory under `work_root`.
    pub fn new(submission: &Submission, input: I, work_root: &Path) -> JudgeResult<Self> {
        std::fs::create_dir_all(work_root)?;
        let work_dir = tempfile::Builder::new()
            .prefix(&format!("agora-{}-", submission.id.simple()))
            .tempdir_in(work_root)?;

        tracing::debug!(
            submission_id = %submission.id,
            work_dir = %work_dir.path().display(),
            "Created working directory"
        );

        Ok(Self {
            submission_id: submission.id,
            code: submission.code.clone(),
            file_content: submission.file_content.clone(),
            input,
            time_limit_ms: submission.time_limit_ms,
            memory_limit_bytes: submission.memory_limit_bytes,
            work_dir,
        })
    }

    pub fn working_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Write `content` to `relative` inside the working directory, creating parents.
    pub async fn write_file(&self, relative: impl AsRef<Path>, content: &str) -> JudgeResult<PathBuf> {
        let path = self.working_dir().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;
        Ok(path)
    }

    /// Create `relative` as a Python package (directory plus empty `__init__.py`).
    pub async fn create_package(&self, relative: impl AsRef<Path>) -> JudgeResult<PathBuf> {
        let dir = self.working_dir().join(relative);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join("__init__.py"), "").await?;
        Ok(dir)
    }

    /// Unpack the submitted archive into the working directory.
    pub async fn unpack_archive(&self) -> JudgeResult<()> {
        let bytes = self
            .file_content
            .clone()
            .ok_or_else(|| JudgeError::InvalidSubmission("Submission archive is missing".into()))?;
        let dest = self.working_dir().to_path_buf();

        tokio::task::spawn_blocking(move || extract_zip(&bytes, &dest))
            .await
            .map_err(|e| JudgeError::Archive(format!("Extraction task failed: {e}")))??;

        Ok(())
    }

    /// Replace the working directory path in learner-visible text.
    pub fn mask_working_dir(&self, text: &str) -> String {
        let dir = self.working_dir().to_string_lossy();
        if dir.is_empty() {
            return text.to_string();
        }
        text.replace(dir.as_ref(), "...")
    }
}

fn extract_zip(bytes: &[u8], dest_dir: &Path) -> JudgeResult<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| JudgeError::Archive(format!("Failed to read ZIP archive: {e}")))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| JudgeError::Archive(e.to_string()))?;

        // Entries escaping the destination are skipped
        let Some(relative) = file.enclosed_name() else {
            tracing::warn!(entry = %file.name(), "Skipping unsafe archive entry");
            continue;
        };
        let outpath = dest_dir.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = std::fs::File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)?;
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    use agora_common::{SimpleInput, SubmissionInput};
    use uuid::Uuid;
    use zip::write::SimpleFileOptions;

    pub(crate) fn submission(code: &str) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            execution_strategy: "python-code".into(),
            code: code.into(),
            file_content: None,
            time_limit_ms: 1000,
            memory_limit_bytes: 64 * 1024 * 1024,
            input: SubmissionInput::Simple(SimpleInput {
                input: String::new(),
                expected_output: None,
            }),
            processing_comment: None,
        }
    }

    pub(crate) fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_directories_are_fresh_and_removed() {
        let root = tempfile::tempdir().unwrap();
        let sub = submission("print(1)");

        let first = ExecutionContext::new(&sub, (), root.path()).unwrap();
        let second = ExecutionContext::new(&sub, (), root.path()).unwrap();
        assert_ne!(first.working_dir(), second.working_dir());

        let path = first.write_file("solution.py", &first.code).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "print(1)");

        let dir = first.working_dir().to_path_buf();
        drop(first);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_unpack_archive() {
        let root = tempfile::tempdir().unwrap();
        let mut sub = submission("");
        sub.file_content = Some(zip_of(&[("app/main.py", "x = 1"), ("../evil.py", "boom")]));

        let ctx = ExecutionContext::new(&sub, (), root.path()).unwrap();
        ctx.unpack_archive().await.unwrap();

        let main = ctx.working_dir().join("app/main.py");
        assert_eq!(std::fs::read_to_string(main).unwrap(), "x = 1");
        assert!(!root.path().join("evil.py").exists());
    }

    #[tokio::test]
    async fn test_missing_archive_is_invalid_submission() {
        let root = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(&submission(""), (), root.path()).unwrap();
        let err = ctx.unpack_archive().await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_SUBMISSION");
    }

    #[test]
    fn test_mask_working_dir() {
        let root = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::new(&submission(""), (), root.path()).unwrap();
        let text = format!("File \"{}/solution.py\", line 1", ctx.working_dir().display());
        assert_eq!(ctx.mask_working_dir(&text), "File \".../solution.py\", line 1");
    }
}
