//! Build session - reads the input binary, runs the pipeline and writes the
//! image.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::events::{BuildObserver, TracingObserver};
use crate::pipeline::{BuildError, BuildOptions, BuiltImage, ImageBuilder};
use crate::signing::{KeyHandle, OpensslSigner, Signer};
use crate::signing::openssl::DEFAULT_OPENSSL;

/// Configuration for a build session.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Application binary.
    pub input: Option<PathBuf>,
    /// Image to write.
    pub output: Option<PathBuf>,
    /// LZMA-compress the payload.
    pub compress: bool,
    /// Private key handed to the signer; signing is off without it.
    pub sign_key: Option<PathBuf>,
    /// Write only the (signed/compressed) payload, no OTA header.
    pub bin_only: bool,
    /// Signer program, `openssl` when unset.
    pub openssl: Option<String>,
    /// Pass data to the signer through a temporary directory instead of pipes.
    pub scratch_files: bool,
}

impl BuildConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BuildConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            compress: self.compress,
            sign_key: self.sign_key.clone().map(KeyHandle::new),
            bin_only: self.bin_only,
        }
    }

    pub fn signer(&self) -> OpensslSigner {
        OpensslSigner::with_program(self.openssl.as_deref().unwrap_or(DEFAULT_OPENSSL))
            .scratch_files(self.scratch_files)
    }
}

/// One input binary turned into one output image.
pub struct BuildSession<S: Signer, O: BuildObserver = TracingObserver> {
    input: PathBuf,
    output: PathBuf,
    builder: ImageBuilder<S, O>,
}

impl BuildSession<OpensslSigner> {
    /// Create a session signing through openssl and logging through tracing.
    pub fn new(config: &BuildConfig) -> Result<Self, BuildError> {
        let input = config.input.clone().ok_or(BuildError::MissingSetting("input"))?;
        let output = config
            .output
            .clone()
            .ok_or(BuildError::MissingSetting("output"))?;
        let builder = ImageBuilder::new(config.signer(), config.build_options());
        Ok(Self::with_builder(input, output, builder))
    }
}

impl<S: Signer, O: BuildObserver> BuildSession<S, O> {
    pub fn with_builder<P: Into<PathBuf>, Q: Into<PathBuf>>(
        input: P,
        output: Q,
        builder: ImageBuilder<S, O>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            builder,
        }
    }

    pub fn builder(&self) -> &ImageBuilder<S, O> {
        &self.builder
    }

    fn load_input(&self) -> Result<Vec<u8>, BuildError> {
        info!(path = %self.input.display(), "Loading input binary");
        std::fs::read(&self.input).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BuildError::InputNotFound(self.input.clone()),
            _ => BuildError::IoFailure {
                path: self.input.clone(),
                source: e,
            },
        })
    }

    /// Write through a temporary file in the target directory so a failed
    /// write never leaves a partial image behind.
    fn write_output(&self, bytes: &[u8]) -> Result<(), BuildError> {
        let io_failure = |source: std::io::Error| BuildError::IoFailure {
            path: self.output.clone(),
            source,
        };
        let dir = match self.output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io_failure)?;
        file.write_all(bytes).map_err(io_failure)?;
        file.flush().map_err(io_failure)?;
        file.persist(&self.output).map_err(|e| io_failure(e.error))?;
        Ok(())
    }

    /// Run the complete build.
    #[instrument(
        skip(self),
        fields(input = %self.input.display(), output = %self.output.display())
    )]
    pub fn run(&self) -> Result<BuiltImage, BuildError> {
        let input = self.load_input()?;
        let image = self.builder.build(input)?;
        self.write_output(&image.to_bytes())?;

        if image.header.is_some() {
            info!(path = %self.output.display(), len = image.len(), "OTA image generated");
        } else {
            info!(path = %self.output.display(), len = image.len(), "Binary generated");
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::protocol::ImageHeader;
    use crate::signing::MockSigner;
    use tempfile::TempDir;

    fn firmware() -> Vec<u8> {
        let mut data: Vec<u8> = (0..2048u32).map(|i| (i % 13) as u8).collect();
        data[64..69].copy_from_slice(b"M_425");
        data
    }

    fn session(
        dir: &TempDir,
        options: BuildOptions,
        signer: MockSigner,
    ) -> BuildSession<MockSigner, NullObserver> {
        BuildSession::with_builder(
            dir.path().join("app.bin"),
            dir.path().join("app.ota"),
            ImageBuilder::with_observer(signer, options, NullObserver),
        )
    }

    #[test]
    fn test_run_writes_image() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.bin"), firmware()).unwrap();

        let session = session(
            &dir,
            BuildOptions {
                compress: true,
                sign_key: Some(KeyHandle::new("key.pem")),
                bin_only: false,
            },
            MockSigner::new(),
        );
        let image = session.run().unwrap();

        let written = std::fs::read(dir.path().join("app.ota")).unwrap();
        assert_eq!(written, image.to_bytes());
        let header = ImageHeader::parse(&written).unwrap();
        assert!(header.options.is_packed());
        assert_eq!(header.payload_len(), written.len() - ImageHeader::SIZE);
    }

    #[test]
    fn test_missing_input() {
        let dir = TempDir::new().unwrap();
        let err = session(&dir, BuildOptions::default(), MockSigner::new())
            .run()
            .unwrap_err();
        assert!(matches!(err, BuildError::InputNotFound(_)));
        assert!(!dir.path().join("app.ota").exists());
    }

    #[test]
    fn test_signing_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.bin"), firmware()).unwrap();

        let signer = MockSigner::new();
        signer.fail();
        let session = session(
            &dir,
            BuildOptions {
                sign_key: Some(KeyHandle::new("key.pem")),
                ..Default::default()
            },
            signer,
        );
        assert!(matches!(
            session.run(),
            Err(BuildError::SigningFailure(_))
        ));

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_unwritable_output() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.bin"), firmware()).unwrap();
        let session = BuildSession::with_builder(
            dir.path().join("app.bin"),
            dir.path().join("missing").join("app.ota"),
            ImageBuilder::with_observer(MockSigner::new(), BuildOptions::default(), NullObserver),
        );
        assert!(matches!(session.run(), Err(BuildError::IoFailure { .. })));
    }

    #[test]
    fn test_repeat_runs_identical() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.bin"), firmware()).unwrap();
        let options = BuildOptions {
            compress: true,
            sign_key: Some(KeyHandle::new("key.pem")),
            bin_only: false,
        };

        session(&dir, options.clone(), MockSigner::new()).run().unwrap();
        let first = std::fs::read(dir.path().join("app.ota")).unwrap();
        session(&dir, options, MockSigner::new()).run().unwrap();
        let second = std::fs::read(dir.path().join("app.ota")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("otagen.toml");
        let config = BuildConfig {
            input: Some("app.bin".into()),
            output: Some("app.ota".into()),
            compress: true,
            sign_key: Some("private.pem".into()),
            bin_only: false,
            openssl: Some("/usr/bin/openssl".into()),
            scratch_files: true,
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(BuildConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_config_defaults() {
        let config: BuildConfig = toml::from_str("input = \"app.bin\"\ncompress = true\n").unwrap();
        assert_eq!(config.input, Some(PathBuf::from("app.bin")));
        assert!(config.compress);
        assert!(config.sign_key.is_none());

        let options = config.build_options();
        assert!(options.compress);
        assert!(options.sign_key.is_none());
        assert!(!options.bin_only);
        assert_eq!(config.signer().program(), "openssl");
    }

    #[test]
    fn test_session_requires_paths() {
        let err = BuildSession::new(&BuildConfig::default()).err().unwrap();
        assert!(matches!(err, BuildError::MissingSetting("input")));
    }
}
