//! `Signer` backed by the openssl command line tool.
//!
//! Runs `openssl dgst -sha256 -sign <key> -binary`. By default the payload is
//! piped through stdin and the DER signature read from stdout. Scratch-file
//! mode passes real paths inside a private temporary directory that is removed
//! when the call returns, on success and on failure.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tracing::{debug, trace};

use super::traits::{DerSignature, KeyHandle, Signer, SignerError};

/// Default signer program.
pub const DEFAULT_OPENSSL: &str = "openssl";

#[derive(Debug, Clone)]
pub struct OpensslSigner {
    program: String,
    scratch_files: bool,
}

impl OpensslSigner {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_OPENSSL)
    }

    pub fn with_program<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            scratch_files: false,
        }
    }

    /// Shuttle data through files instead of pipes.
    pub fn scratch_files(mut self, enable: bool) -> Self {
        self.scratch_files = enable;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, key: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("dgst")
            .arg("-sha256")
            .arg("-sign")
            .arg(key)
            .arg("-binary");
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> SignerError {
        SignerError::Spawn {
            program: self.program.clone(),
            source,
        }
    }

    fn sign_piped(&self, data: &[u8], key: &Path) -> Result<Vec<u8>, SignerError> {
        let mut child = self
            .command(key)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // openssl only writes the signature after stdin closes
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(data),
            None => Ok(()),
        };
        let output = child.wait_with_output()?;
        check_status(&output)?;
        written?;
        Ok(output.stdout)
    }

    fn sign_scratch(&self, data: &[u8], key: &Path) -> Result<Vec<u8>, SignerError> {
        let dir = tempfile::Builder::new().prefix("otagen-sign").tempdir()?;
        let input = dir.path().join("payload.bin");
        let signature = dir.path().join("payload.der");
        std::fs::write(&input, data)?;
        debug!(dir = %dir.path().display(), "Signing through scratch files");

        let output = self
            .command(key)
            .arg("-out")
            .arg(&signature)
            .arg(&input)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(e))?;
        check_status(&output)?;

        match std::fs::read(&signature) {
            Ok(der) => Ok(der),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SignerError::EmptyOutput),
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for OpensslSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer for OpensslSigner {
    fn sign(&self, data: &[u8], key: &KeyHandle) -> Result<DerSignature, SignerError> {
        debug!(
            program = %self.program,
            key = %key.path().display(),
            len = data.len(),
            "Invoking signer"
        );
        let der = if self.scratch_files {
            self.sign_scratch(data, key.path())?
        } else {
            self.sign_piped(data, key.path())?
        };
        if der.is_empty() {
            return Err(SignerError::EmptyOutput);
        }
        trace!(der = ?der, "DER signature");
        Ok(DerSignature(der))
    }

    fn name(&self) -> &'static str {
        "openssl"
    }
}

fn check_status(output: &Output) -> Result<(), SignerError> {
    if output.status.success() {
        return Ok(());
    }
    Err(SignerError::Failed {
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::der::{decode_der_signature, encode_der_signature};
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Scratch tests compare the temp dir listing; keep them from overlapping.
    static SCRATCH_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_missing_program() {
        let signer = OpensslSigner::with_program("otagen-no-such-signer");
        let err = signer
            .sign(b"payload", &KeyHandle::new("key.pem"))
            .unwrap_err();
        assert!(matches!(err, SignerError::Spawn { .. }));
    }

    #[test]
    fn test_missing_program_scratch_leaves_nothing() {
        let _guard = SCRATCH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let signer = OpensslSigner::with_program("otagen-no-such-signer").scratch_files(true);
        let before: Vec<_> = scratch_dirs();
        assert!(signer.sign(b"payload", &KeyHandle::new("key.pem")).is_err());
        assert_eq!(scratch_dirs(), before);
    }

    fn scratch_dirs() -> Vec<std::path::PathBuf> {
        let mut dirs: Vec<_> = std::fs::read_dir(std::env::temp_dir())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with("otagen-sign"))
                    })
                    .collect()
            })
            .unwrap_or_default();
        dirs.sort();
        dirs
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure() {
        // `false` ignores its arguments and exits 1
        let signer = OpensslSigner::with_program("false");
        let err = signer.sign(b"x", &KeyHandle::new("key.pem")).unwrap_err();
        assert!(matches!(err, SignerError::Failed { .. }), "{err:?}");
    }

    /// Stand-in for openssl: records its arguments and the data it was asked
    /// to sign, then emits `sig.der` on stdout or to the `-out` path.
    #[cfg(unix)]
    fn fake_openssl(dir: &TempDir, der: &[u8]) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let root = dir.path().display();
        std::fs::write(dir.path().join("sig.der"), der).unwrap();
        let script = format!(
            r#"#!/bin/sh
printf '%s\n' "$@" > "{root}/args.txt"
out=""
prev=""
last=""
for a in "$@"; do
  if [ "$prev" = "-out" ]; then out="$a"; fi
  prev="$a"
  last="$a"
done
if [ -n "$out" ]; then
  cp "$last" "{root}/signed.bin"
  cp "{root}/sig.der" "$out"
else
  cat > "{root}/signed.bin"
  cat "{root}/sig.der"
fi
"#
        );
        let path = dir.path().join("fake-openssl");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn fixed_der() -> Vec<u8> {
        let r: Vec<u8> = (0x90..0xB0).collect();
        let s: Vec<u8> = (0x11..0x31).collect();
        encode_der_signature(&r, &s)
    }

    #[cfg(unix)]
    #[test]
    fn test_piped_signing_succeeds() {
        let dir = TempDir::new().unwrap();
        let der = fixed_der();
        let signer = OpensslSigner::with_program(fake_openssl(&dir, &der).to_str().unwrap());
        let payload: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();

        let signature = signer.sign(&payload, &KeyHandle::new("key.pem")).unwrap();
        assert_eq!(signature.as_bytes(), der.as_slice());
        assert_eq!(
            signature.to_raw().unwrap(),
            decode_der_signature(&der).unwrap()
        );
        assert_eq!(std::fs::read(dir.path().join("signed.bin")).unwrap(), payload);

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(
            args.lines().collect::<Vec<_>>(),
            vec!["dgst", "-sha256", "-sign", "key.pem", "-binary"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_scratch_signing_succeeds_and_cleans_up() {
        let _guard = SCRATCH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().unwrap();
        let der = fixed_der();
        let signer = OpensslSigner::with_program(fake_openssl(&dir, &der).to_str().unwrap())
            .scratch_files(true);
        let payload = vec![0x5Au8; 777];

        let before = scratch_dirs();
        let signature = signer.sign(&payload, &KeyHandle::new("key.pem")).unwrap();
        assert_eq!(scratch_dirs(), before);

        assert_eq!(signature.as_bytes(), der.as_slice());
        assert_eq!(std::fs::read(dir.path().join("signed.bin")).unwrap(), payload);

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        let args: Vec<_> = args.lines().collect();
        assert_eq!(&args[..6], &["dgst", "-sha256", "-sign", "key.pem", "-binary", "-out"]);
        assert!(args[6].ends_with("payload.der"));
        assert!(args[7].ends_with("payload.bin"));
        // scratch directory is gone once the call returns
        let scratch = std::path::Path::new(args[7]).parent().unwrap();
        assert!(!scratch.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_empty_signature_output() {
        let dir = TempDir::new().unwrap();
        let signer = OpensslSigner::with_program(fake_openssl(&dir, &[]).to_str().unwrap());
        let err = signer.sign(b"data", &KeyHandle::new("key.pem")).unwrap_err();
        assert!(matches!(err, SignerError::EmptyOutput));
    }

    /// Signs with the real tool when it is installed and checks the result
    /// against the public key.
    #[test]
    fn test_openssl_signature_verifies() {
        use p256::ecdsa::signature::Verifier as _;
        use p256::ecdsa::{Signature, VerifyingKey};

        let _guard = SCRATCH_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("key.pem");
        let generated = Command::new(DEFAULT_OPENSSL)
            .args(["ecparam", "-name", "prime256v1", "-genkey", "-noout", "-out"])
            .arg(&key)
            .output();
        match generated {
            Ok(out) if out.status.success() => {}
            _ => {
                eprintln!("openssl not available, skipping");
                return;
            }
        }
        let public = Command::new(DEFAULT_OPENSSL)
            .args(["ec", "-pubout", "-outform", "DER", "-conv_form", "uncompressed", "-in"])
            .arg(&key)
            .output()
            .unwrap();
        assert!(public.status.success());
        // SubjectPublicKeyInfo ends with the 65-byte uncompressed point
        let point = &public.stdout[public.stdout.len() - 65..];
        let verifying_key = VerifyingKey::from_sec1_bytes(point).unwrap();

        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        for scratch in [false, true] {
            let signer = OpensslSigner::new().scratch_files(scratch);
            let raw = signer
                .sign(&payload, &KeyHandle::new(key.clone()))
                .unwrap()
                .to_raw()
                .unwrap();

            let mut be = [0u8; 64];
            be[..32].copy_from_slice(raw.r());
            be[32..].copy_from_slice(raw.s());
            be[..32].reverse();
            be[32..].reverse();
            let signature = Signature::from_slice(&be).unwrap();
            verifying_key.verify(&payload, &signature).unwrap();
        }
    }
}
