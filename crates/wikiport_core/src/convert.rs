use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

/// Source rendering format to intermediate wiki markup.
pub trait FormatConverter {
    fn convert(&self, text: &str, from: &str, to: &str, options: &[String]) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSpec {
    pub from: String,
    pub to: String,
    pub options: Vec<String>,
}

impl Default for ConversionSpec {
    fn default() -> Self {
        Self {
            from: "markdown".to_string(),
            to: "mediawiki".to_string(),
            options: vec!["-s".to_string()],
        }
    }
}

impl ConversionSpec {
    pub fn apply<C: FormatConverter + ?Sized>(&self, converter: &C, text: &str) -> Result<String> {
        converter.convert(text, &self.from, &self.to, &self.options)
    }
}

/// Runs the `pandoc` binary (or `PANDOC_PATH`) with the text on stdin.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    binary: PathBuf,
}

impl Default for PandocConverter {
    fn default() -> Self {
        let binary = std::env::var("PANDOC_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("pandoc"));
        Self { binary }
    }
}

impl PandocConverter {
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl FormatConverter for PandocConverter {
    fn convert(&self, text: &str, from: &str, to: &str, options: &[String]) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .arg("-f")
            .arg(from)
            .arg("-t")
            .arg(to)
            .args(options)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute {}", self.binary.display()))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow::anyhow!("pandoc stdin was not captured"))?;
            stdin
                .write_all(text.as_bytes())
                .context("failed to write pandoc input")?;
        }

        let output = child
            .wait_with_output()
            .context("failed to wait for pandoc")?;
        if !output.status.success() {
            bail!(
                "pandoc exited with {}: {}",
                output.status.code().unwrap_or(1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        String::from_utf8(output.stdout).context("pandoc output is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoConverter;

    impl FormatConverter for EchoConverter {
        fn convert(&self, text: &str, from: &str, to: &str, options: &[String]) -> Result<String> {
            Ok(format!("{from}->{to}{}:{text}", options.join("")))
        }
    }

    #[test]
    fn default_spec_is_markdown_to_standalone_mediawiki() {
        let spec = ConversionSpec::default();
        let converted = spec.apply(&EchoConverter, "body").expect("convert");
        assert_eq!(converted, "markdown->mediawiki-s:body");
    }

    #[test]
    fn missing_binary_is_reported() {
        let converter = PandocConverter::with_binary("/nonexistent/pandoc-binary");
        let error = converter
            .convert("x", "markdown", "mediawiki", &[])
            .expect_err("must fail");
        assert!(error.to_string().contains("failed to execute"));
    }
}
