//! Binary acquisition
//!
//! Puts a runnable daemon at `<data_dir>/bin/<daemon>`:
//! 1. Keep an existing binary untouched
//! 2. Download the chain's precompiled binary for this platform
//! 3. Otherwise build it from source
//!
//! A download failure is reported as is; it does not fall back to a build.
//! Chains sharing a daemon name share one binary; acquisitions for the same
//! destination are serialized and an installed binary is never replaced.

pub mod build;
pub mod download;

use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::info;

use crate::node::{Node, NodeError};

pub use build::{BuildStrategy, SourceBuilder, Toolchain};
pub use download::BinaryDownloader;

/// How the binary ended up in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    AlreadyPresent,
    Downloaded,
    Built,
}

/// Registry platform key for the running host, e.g. `linux/amd64`
pub fn current_platform() -> Option<String> {
    let os = match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "darwin",
        "windows" => "windows",
        _ => return None,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        _ => return None,
    };
    Some(format!("{}/{}", os, arch))
}

/// Downloads or builds node binaries
#[derive(Debug, Clone)]
pub struct BinaryAcquirer {
    downloader: BinaryDownloader,
    builder: SourceBuilder,
    platform: Option<String>,
    install_locks: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl BinaryAcquirer {
    pub fn new(toolchain: Toolchain) -> Result<Self, NodeError> {
        Ok(Self {
            downloader: BinaryDownloader::new()?,
            builder: SourceBuilder::new(toolchain),
            platform: current_platform(),
            install_locks: Arc::default(),
        })
    }

    /// Use `platform` instead of the host's when looking up binaries
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    fn install_lock(&self, dest: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.install_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(dest.to_path_buf()).or_default().clone()
    }

    /// Make sure the node's binary exists
    ///
    /// An existing file at the destination is never replaced, so calling this
    /// again performs no network or subprocess work.
    pub async fn ensure_binary(&self, node: &Node) -> Result<Acquisition, NodeError> {
        let dest = &node.paths.binary;
        let lock = self.install_lock(dest);
        let _guard = lock.lock().await;

        if dest.exists() {
            node.note("===== BINARY ALREADY EXISTS =====");
            node.note(format!("Path: {}", dest.display()));
            node.note("Skipping download");
            return Ok(Acquisition::AlreadyPresent);
        }

        tokio::fs::create_dir_all(node.paths.bin_dir()).await?;

        let url = self
            .platform
            .as_deref()
            .and_then(|platform| node.descriptor.binary_url(platform));

        match url {
            Some(url) => {
                node.note("===== DOWNLOADING BINARY =====");
                node.note(format!("Chain: {}", node.descriptor.display_name()));
                node.note(format!("Source: {}", url));
                node.note(format!("Destination: {}", dest.display()));

                self.downloader.download(url, dest, node.log()).await?;

                node.note("===== DOWNLOAD COMPLETED SUCCESSFULLY =====");
                Ok(Acquisition::Downloaded)
            }
            None => {
                node.note("===== NO PRECOMPILED BINARY AVAILABLE =====");
                node.note(format!(
                    "Platform: {}",
                    self.platform.as_deref().unwrap_or("unsupported")
                ));
                node.note("Attempting to build from source...");

                let built = self.builder.build(node).await?;
                install_binary(&built, dest).await?;

                node.note(format!("Binary built successfully at {}", dest.display()));
                node.note("===== BUILD PROCESS COMPLETED SUCCESSFULLY =====");
                Ok(Acquisition::Built)
            }
        }
    }
}

/// Copy `src` to `dest` through a staging file, leaving an existing `dest` alone
pub async fn install_binary(src: &Path, dest: &Path) -> Result<(), NodeError> {
    let (src, dest) = (src.to_path_buf(), dest.to_path_buf());
    blocking(move || {
        if dest.exists() {
            info!(dest = %dest.display(), "Binary already installed, not replacing");
            return Ok(());
        }

        let mut staged = staging_file(&dest, ".staged")?;
        let mut source = std::fs::File::open(&src)
            .map_err(|e| NodeError::Acquisition(format!("failed to copy binary: {}", e)))?;
        std::io::copy(&mut source, staged.as_file_mut())
            .map_err(|e| NodeError::Acquisition(format!("failed to copy binary: {}", e)))?;
        make_executable(staged.path())?;

        match staged.persist_noclobber(&dest) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                info!(dest = %dest.display(), "Binary installed concurrently, not replacing");
                Ok(())
            }
            Err(e) => Err(e.error.into()),
        }
    })
    .await
}

/// A uniquely named `.<name>.XXXXXX<suffix>` file beside `dest`
pub(crate) fn staging_file(dest: &Path, suffix: &str) -> Result<NamedTempFile, NodeError> {
    let dir = dest
        .parent()
        .ok_or_else(|| NodeError::Acquisition(format!("{} has no parent directory", dest.display())))?;
    let name = dest.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    Ok(tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(suffix)
        .tempfile_in(dir)?)
}

/// Run filesystem-heavy work off the async workers
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, NodeError>
where
    F: FnOnce() -> Result<T, NodeError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| NodeError::Io(format!("blocking task failed: {}", e)))?
}

/// chmod 0755
pub(crate) fn make_executable(path: &Path) -> Result<(), NodeError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn acquirer() -> BinaryAcquirer {
        let toolchain = Toolchain {
            git: "no-such-git-3b1e".into(),
            go: "no-such-go-3b1e".into(),
            make: "no-such-make-3b1e".into(),
            gopath: None,
        };
        BinaryAcquirer::new(toolchain).unwrap().with_platform("linux/amd64")
    }

    #[test]
    fn test_current_platform_shape() {
        if let Some(platform) = current_platform() {
            let (os, arch) = platform.split_once('/').unwrap();
            assert!(["linux", "darwin", "windows"].contains(&os));
            assert!(["amd64", "arm64"].contains(&arch));
        }
    }

    #[tokio::test]
    async fn test_existing_binary_is_untouched() {
        let dir = TempDir::new().unwrap();
        let node = test_support::node(dir.path(), "osmosis", "osmosisd");
        std::fs::create_dir_all(node.paths.bin_dir()).unwrap();
        std::fs::write(&node.paths.binary, "original").unwrap();

        let result = acquirer().ensure_binary(&node).await.unwrap();
        assert_eq!(result, Acquisition::AlreadyPresent);
        assert_eq!(std::fs::read_to_string(&node.paths.binary).unwrap(), "original");
        assert!(node.log().contents().contains("===== BINARY ALREADY EXISTS ====="));
    }

    #[tokio::test]
    async fn test_download_then_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/osmosisd-linux-amd64"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"binary".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut descriptor = test_support::descriptor("osmosis", "osmosisd");
        descriptor.codebase.binaries.insert(
            "linux/amd64".into(),
            format!("{}/osmosisd-linux-amd64", server.uri()),
        );
        let log = Arc::new(crate::logs::LogSink::new("osmosis", 100_000, 90_000));
        let node = Node::new(Arc::new(descriptor), dir.path(), log).unwrap();

        let acquirer = acquirer();
        assert_eq!(acquirer.ensure_binary(&node).await.unwrap(), Acquisition::Downloaded);
        assert_eq!(acquirer.ensure_binary(&node).await.unwrap(), Acquisition::AlreadyPresent);
        assert_eq!(std::fs::read(&node.paths.binary).unwrap(), b"binary");
        assert!(node.log().contents().contains("===== DOWNLOAD COMPLETED SUCCESSFULLY ====="));
        // MockServer verifies the single request on drop
    }

    #[tokio::test]
    async fn test_build_path_requires_toolchain() {
        let dir = TempDir::new().unwrap();
        let mut descriptor = test_support::descriptor("juno", "junod");
        descriptor.codebase.git_repo = "https://github.com/CosmosContracts/juno".into();
        // Only a binary for another platform
        descriptor
            .codebase
            .binaries
            .insert("darwin/arm64".into(), "https://example.invalid/junod".into());
        let log = Arc::new(crate::logs::LogSink::new("juno", 100_000, 90_000));
        let node = Node::new(Arc::new(descriptor), dir.path(), log).unwrap();

        let err = acquirer().ensure_binary(&node).await.unwrap_err();
        assert!(matches!(err, NodeError::Acquisition(ref msg) if msg.contains("git is required")));
        assert!(!node.paths.binary.exists());
        assert!(node.log().contents().contains("NO PRECOMPILED BINARY AVAILABLE"));
    }

    #[tokio::test]
    async fn test_install_binary_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("built");
        let dest = dir.path().join("dest");
        std::fs::write(&src, "new").unwrap();

        install_binary(&src, &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");

        std::fs::write(&src, "newer").unwrap();
        install_binary(&src, &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["built".to_string(), "dest".to_string()]);
    }

    #[tokio::test]
    async fn test_chains_sharing_a_daemon_download_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/terra/terrad"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 512 * 1024]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/terra2/terrad"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'b'; 512 * 1024]))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let node_for = |chain: &str| {
            let mut descriptor = test_support::descriptor(chain, "terrad");
            descriptor.codebase.binaries.insert(
                "linux/amd64".into(),
                format!("{}/{}/terrad", server.uri(), chain),
            );
            let log = Arc::new(crate::logs::LogSink::new(chain, 100_000, 90_000));
            Node::new(Arc::new(descriptor), dir.path(), log).unwrap()
        };
        let terra = node_for("terra");
        let terra2 = node_for("terra2");
        assert_eq!(terra.paths.binary, terra2.paths.binary);

        let acquirer = acquirer();
        let (a, b) = tokio::join!(acquirer.ensure_binary(&terra), acquirer.ensure_binary(&terra2));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o != Acquisition::Downloaded);
        assert_eq!(outcomes, vec![Acquisition::Downloaded, Acquisition::AlreadyPresent]);

        let installed = std::fs::read(&terra.paths.binary).unwrap();
        assert_eq!(installed.len(), 512 * 1024);
        assert!(installed.iter().all(|&b| b == installed[0]));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
