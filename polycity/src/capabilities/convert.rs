//! Model conversion through an external converter program

use super::CapabilityError;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

#[async_trait]
pub trait ModelConverter: Send + Sync {
    /// Target formats (file extensions) produced for every model
    fn formats(&self) -> &[String];

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), CapabilityError>;
}

/// Runs `<program> export <input> <output>` (the assimp command line)
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    formats: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: String, formats: Vec<String>) -> Self {
        Self { program, formats }
    }
}

#[async_trait]
impl ModelConverter for CommandConverter {
    fn formats(&self) -> &[String] {
        &self.formats
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), CapabilityError> {
        let result = Command::new(&self.program)
            .arg("export")
            .arg(input)
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CapabilityError::Conversion(format!("{}: {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(CapabilityError::Conversion(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            )));
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(CapabilityError::Conversion(format!(
                "{} reported success but wrote no {}",
                self.program,
                output.display()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_conversion_error() {
        let converter = CommandConverter::new(
            "polycity-no-such-converter".to_string(),
            vec!["dae".to_string()],
        );
        let result = converter
            .convert(Path::new("in.obj"), Path::new("out.dae"))
            .await;
        assert!(matches!(result, Err(CapabilityError::Conversion(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_reports_status() {
        let converter = CommandConverter::new("false".to_string(), vec![]);
        let err = converter
            .convert(Path::new("in.obj"), Path::new("out.dae"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited"));
    }
}
