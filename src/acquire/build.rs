//! Source builds
//!
//! When no precompiled binary exists the chain's repository is cloned and
//! built with the Go toolchain. Cosmos chains are built in many different ways,
//! so the build is an ordered chain of strategies tried until one produces a
//! binary:
//!
//! 1. `go build ./cmd/<daemon>`
//! 2. `go build` from the repository root, if it holds `main.go`
//! 3. `make build`, picking the binary out of `build/`
//! 4. `make install`, copying the binary out of `$GOPATH/bin`
//! 5. recovery from `-mod=readonly` failures: `go install`, then any `main` package
//! 6. whatever earlier steps left in `$GOPATH/bin`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::node::command::{run_logged, CommandOutput};
use crate::node::{Node, NodeError};

/// Stderr text Go prints when `-mod=readonly` blocks a go.mod update
pub const READONLY_MODFILE_MARKER: &str = "updates to go.mod needed, disabled by -mod=readonly";

/// Build tools used for source builds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    #[serde(default = "default_git")]
    pub git: String,

    #[serde(default = "default_go")]
    pub go: String,

    #[serde(default = "default_make")]
    pub make: String,

    /// Overrides `$GOPATH` (and its `$HOME/go` default)
    #[serde(default)]
    pub gopath: Option<PathBuf>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            git: default_git(),
            go: default_go(),
            make: default_make(),
            gopath: None,
        }
    }
}

fn default_git() -> String { "git".to_string() }
fn default_go() -> String { "go".to_string() }
fn default_make() -> String { "make".to_string() }

impl Toolchain {
    /// Resolve a program name against `PATH`, or check an explicit path
    pub fn locate(program: &str) -> Option<PathBuf> {
        if program.is_empty() {
            return None;
        }
        if program.contains(std::path::MAIN_SEPARATOR) {
            let path = PathBuf::from(program);
            return path.is_file().then_some(path);
        }

        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    /// `$GOPATH/bin`
    pub fn gopath_bin(&self) -> PathBuf {
        let gopath = self
            .gopath
            .clone()
            .or_else(|| std::env::var_os("GOPATH").filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(std::env::temp_dir).join("go"));
        gopath.join("bin")
    }
}

/// Why a build step did not produce a binary
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub step: &'static str,
    pub message: String,
    pub stderr: String,
}

impl StepFailure {
    fn new(step: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            stderr: String::new(),
        }
    }

    fn from_output(step: &'static str, what: &str, output: CommandOutput) -> Self {
        Self {
            step,
            message: format!("{} {}", what, output.describe_failure()),
            stderr: output.stderr,
        }
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Everything a build step needs
pub struct BuildContext<'a> {
    pub node: &'a Node,
    pub repo: PathBuf,
    pub go: PathBuf,
    pub make: Option<PathBuf>,
    pub gopath_bin: PathBuf,
    /// Where `go build -o` writes
    pub output: PathBuf,
}

impl BuildContext<'_> {
    fn daemon(&self) -> &str {
        self.node.daemon_name()
    }

    fn go(&self) -> Command {
        let mut cmd = Command::new(&self.go);
        cmd.current_dir(&self.repo);
        cmd
    }

    fn make(&self, step: &'static str) -> Result<Command, StepFailure> {
        let make = self
            .make
            .as_ref()
            .ok_or_else(|| StepFailure::new(step, "make is not installed"))?;
        let mut cmd = Command::new(make);
        cmd.current_dir(&self.repo);
        Ok(cmd)
    }

    async fn run(&self, step: &'static str, cmd: Command) -> Result<CommandOutput, StepFailure> {
        run_logged(cmd, self.node.log())
            .await
            .map_err(|e| StepFailure::new(step, format!("failed to spawn: {}", e)))
    }

    /// `go build -o <output> <package>`
    async fn go_build(&self, step: &'static str, package: Option<&str>) -> Result<PathBuf, StepFailure> {
        let mut cmd = self.go();
        cmd.arg("build").arg("-o").arg(&self.output);
        if let Some(package) = package {
            cmd.arg(package);
        }

        let output = self.run(step, cmd).await?;
        if !output.success() {
            return Err(StepFailure::from_output(step, "go build", output));
        }
        if !self.output.is_file() {
            return Err(StepFailure::new(step, "go build produced no binary"));
        }
        Ok(self.output.clone())
    }

    fn gopath_binary(&self, step: &'static str) -> Result<PathBuf, StepFailure> {
        let candidate = self.gopath_bin.join(self.daemon());
        if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(StepFailure::new(
                step,
                format!("{} not found", candidate.display()),
            ))
        }
    }
}

/// One way of turning a checkout into a binary
#[async_trait]
pub trait BuildStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Try to build; `previous` is the failure of the step before this one
    async fn attempt(
        &self,
        ctx: &BuildContext<'_>,
        previous: Option<&StepFailure>,
    ) -> Result<PathBuf, StepFailure>;
}

/// `go build -o <out> ./cmd/<daemon>`
pub struct ModuleBuild;

#[async_trait]
impl BuildStrategy for ModuleBuild {
    fn name(&self) -> &'static str {
        "module build"
    }

    async fn attempt(&self, ctx: &BuildContext<'_>, _: Option<&StepFailure>) -> Result<PathBuf, StepFailure> {
        let package = format!("./cmd/{}", ctx.daemon());
        ctx.node.note(format!(
            "Command: go build -o {} {}",
            ctx.output.display(),
            package
        ));
        ctx.go_build(self.name(), Some(&package)).await
    }
}

/// `go build` at the repository root
pub struct RootBuild;

#[async_trait]
impl BuildStrategy for RootBuild {
    fn name(&self) -> &'static str {
        "root build"
    }

    async fn attempt(&self, ctx: &BuildContext<'_>, _: Option<&StepFailure>) -> Result<PathBuf, StepFailure> {
        if !ctx.repo.join("main.go").is_file() {
            return Err(StepFailure::new(self.name(), "no main.go at repository root"));
        }
        ctx.node.note("===== ATTEMPTING BUILD FROM ROOT DIRECTORY =====");
        ctx.go_build(self.name(), None).await
    }
}

/// `make build`, then look in `build/`
pub struct MakeBuild;

#[async_trait]
impl BuildStrategy for MakeBuild {
    fn name(&self) -> &'static str {
        "make build"
    }

    async fn attempt(&self, ctx: &BuildContext<'_>, _: Option<&StepFailure>) -> Result<PathBuf, StepFailure> {
        ctx.node.note("===== TRYING 'make build' =====");

        // Best effort; stale go.sum files are common in tagged releases
        let mut tidy = ctx.go();
        tidy.arg("mod").arg("tidy");
        if let Ok(output) = ctx.run(self.name(), tidy).await {
            if !output.success() {
                debug!(chain = %ctx.node.chain_name(), "go mod tidy failed, continuing");
            }
        }

        let mut cmd = ctx.make(self.name())?;
        cmd.arg("build");
        let output = ctx.run(self.name(), cmd).await?;
        if !output.success() {
            return Err(StepFailure::from_output(self.name(), "make build", output));
        }

        find_build_artifact(&ctx.repo.join("build"), ctx.daemon(), ctx.node.chain_name())
            .ok_or_else(|| StepFailure::new(self.name(), "no matching binary in build/"))
    }
}

/// `make install` with `GO_MOD_FLAGS` cleared
pub struct InstallBuild;

#[async_trait]
impl BuildStrategy for InstallBuild {
    fn name(&self) -> &'static str {
        "make install"
    }

    async fn attempt(&self, ctx: &BuildContext<'_>, _: Option<&StepFailure>) -> Result<PathBuf, StepFailure> {
        ctx.node.note("===== TRYING 'make install' (WITHOUT -mod=readonly) =====");

        let mut cmd = ctx.make(self.name())?;
        cmd.arg("install").env("GO_MOD_FLAGS", "");
        let output = ctx.run(self.name(), cmd).await?;
        if !output.success() {
            return Err(StepFailure::from_output(self.name(), "make install", output));
        }
        ctx.gopath_binary(self.name())
    }
}

/// Recover from `-mod=readonly` failures of `make install`
pub struct ReadonlyRecovery;

#[async_trait]
impl BuildStrategy for ReadonlyRecovery {
    fn name(&self) -> &'static str {
        "readonly recovery"
    }

    async fn attempt(
        &self,
        ctx: &BuildContext<'_>,
        previous: Option<&StepFailure>,
    ) -> Result<PathBuf, StepFailure> {
        let readonly = previous
            .map(|p| p.stderr.contains(READONLY_MODFILE_MARKER))
            .unwrap_or(false);
        if !readonly {
            return Err(StepFailure::new(self.name(), "no -mod=readonly failure to recover from"));
        }

        ctx.node.note("===== DETECTED -mod=readonly ERROR, TRYING DIRECT GO INSTALL =====");
        let mut install = ctx.go();
        install.arg("install").arg(format!("./cmd/{}", ctx.daemon()));
        let output = ctx.run(self.name(), install).await?;
        if output.success() {
            if let Ok(binary) = ctx.gopath_binary(self.name()) {
                return Ok(binary);
            }
        }

        ctx.node.note("===== TRYING BROADER SEARCH FOR ENTRY POINT =====");
        let repo = ctx.repo.clone();
        let candidates = super::blocking(move || Ok(find_main_packages(&repo)))
            .await
            .unwrap_or_default();
        for dir in candidates {
            ctx.node.note(format!("Trying to build main package found in: {}", dir));
            if let Ok(binary) = ctx.go_build(self.name(), Some(&dir)).await {
                ctx.node.note(format!("Successfully built binary from {}", dir));
                return Ok(binary);
            }
        }
        Err(StepFailure::new(self.name(), "no buildable main package found"))
    }
}

/// Pick up a binary an earlier step installed into `$GOPATH/bin`
pub struct GopathFallback;

#[async_trait]
impl BuildStrategy for GopathFallback {
    fn name(&self) -> &'static str {
        "gopath fallback"
    }

    async fn attempt(&self, ctx: &BuildContext<'_>, _: Option<&StepFailure>) -> Result<PathBuf, StepFailure> {
        let binary = ctx.gopath_binary(self.name())?;
        ctx.node.note("===== BINARY FOUND IN GOPATH, COPYING TO DESTINATION =====");
        Ok(binary)
    }
}

/// Strategies in the order they are tried
pub fn default_strategies() -> Vec<Box<dyn BuildStrategy>> {
    vec![
        Box::new(ModuleBuild),
        Box::new(RootBuild),
        Box::new(MakeBuild),
        Box::new(InstallBuild),
        Box::new(ReadonlyRecovery),
        Box::new(GopathFallback),
    ]
}

/// Try each strategy in turn, stopping at the first binary
pub async fn run_strategies(
    strategies: &[Box<dyn BuildStrategy>],
    ctx: &BuildContext<'_>,
) -> Result<PathBuf, NodeError> {
    let mut previous: Option<StepFailure> = None;

    for strategy in strategies {
        match strategy.attempt(ctx, previous.as_ref()).await {
            Ok(binary) => {
                info!(
                    chain = %ctx.node.chain_name(),
                    strategy = strategy.name(),
                    "Source build succeeded"
                );
                return Ok(binary);
            }
            Err(failure) => {
                ctx.node.note(format!("Build step failed: {}", failure));
                previous = Some(failure);
            }
        }
    }

    let cause = previous
        .map(|p| p.to_string())
        .unwrap_or_else(|| "no build strategies configured".to_string());
    Err(NodeError::Acquisition(format!(
        "all build strategies failed, last: {}",
        cause
    )))
}

/// Clones and builds a chain from source
#[derive(Debug, Clone, Default)]
pub struct SourceBuilder {
    toolchain: Toolchain,
}

impl SourceBuilder {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    /// Build the chain's daemon and return the path of the produced binary
    pub async fn build(&self, node: &Node) -> Result<PathBuf, NodeError> {
        let git = Toolchain::locate(&self.toolchain.git).ok_or_else(|| {
            NodeError::Acquisition("git is required to build from source".into())
        })?;
        let go = Toolchain::locate(&self.toolchain.go).ok_or_else(|| {
            NodeError::Acquisition("go is required to build from source".into())
        })?;
        let make = Toolchain::locate(&self.toolchain.make);

        let codebase = &node.descriptor.codebase;
        if codebase.git_repo.is_empty() {
            return Err(NodeError::Acquisition(
                "git repository is not specified in chain info".into(),
            ));
        }

        node.note("===== STARTING BUILD PROCESS =====");
        let source_dir = node.paths.source_dir(node.chain_name());
        tokio::fs::create_dir_all(&source_dir).await?;

        let repo = source_dir.join("repo");
        if !repo.exists() {
            node.note("===== CLONING REPOSITORY =====");
            node.note(format!("Source: {}", codebase.git_repo));
            node.note(format!("Destination: {}", repo.display()));

            let mut clone = Command::new(&git);
            clone.arg("clone").arg(&codebase.git_repo).arg(&repo);
            let output = run_logged(clone, node.log()).await?;
            if !output.success() {
                return Err(NodeError::Acquisition(format!(
                    "failed to clone repository: {}",
                    output.describe_failure()
                )));
            }
        }

        if !codebase.recommended_version.is_empty() {
            checkout(node, &git, &repo, &codebase.recommended_version).await?;
        }

        node.note("===== BUILDING BINARY =====");
        tokio::fs::create_dir_all(source_dir.join("out")).await?;
        let ctx = BuildContext {
            node,
            output: source_dir.join("out").join(node.daemon_name()),
            repo,
            go,
            make,
            gopath_bin: self.toolchain.gopath_bin(),
        };
        run_strategies(&default_strategies(), &ctx).await
    }
}

/// `git checkout <version>`, fetching and retrying once on failure
async fn checkout(node: &Node, git: &Path, repo: &Path, version: &str) -> Result<(), NodeError> {
    node.note(format!("===== CHECKING OUT VERSION {} =====", version));
    let first = git_in(git, repo, &["checkout", version], node).await?;
    if first.success() {
        return Ok(());
    }

    node.note(format!("Warning: Failed to checkout version {}", version));
    node.note("===== FETCHING UPDATES =====");
    let fetch = git_in(git, repo, &["fetch", "--all"], node).await?;
    if !fetch.success() {
        return Err(NodeError::Acquisition(format!(
            "failed to fetch updates: {}",
            fetch.describe_failure()
        )));
    }

    node.note("===== RETRYING CHECKOUT =====");
    let retry = git_in(git, repo, &["checkout", version], node).await?;
    if !retry.success() {
        return Err(NodeError::Acquisition(format!(
            "failed to checkout version {} after fetch: {}",
            version,
            retry.describe_failure()
        )));
    }
    Ok(())
}

async fn git_in(git: &Path, repo: &Path, args: &[&str], node: &Node) -> Result<CommandOutput, NodeError> {
    let mut cmd = Command::new(git);
    cmd.args(args).current_dir(repo);
    run_logged(cmd, node.log())
        .await
        .map_err(|e| NodeError::Acquisition(format!("failed to run git: {}", e)))
}

/// A file in `build/` named after the daemon or containing the chain name
fn find_build_artifact(build_dir: &Path, daemon: &str, chain: &str) -> Option<PathBuf> {
    let mut entries: Vec<_> = std::fs::read_dir(build_dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    entries
        .iter()
        .find(|e| e.file_name() == daemon)
        .or_else(|| {
            entries
                .iter()
                .find(|e| e.file_name().to_string_lossy().contains(chain))
        })
        .map(|e| e.path())
}

/// Directories (as `./relative` package paths) holding a `func main(`
fn find_main_packages(repo: &Path) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    let walker = WalkDir::new(repo).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        e.depth() == 0 || !(name.starts_with('.') || name == "vendor" || name == "testdata")
    });

    for entry in walker.filter_map(Result::ok) {
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map(|e| e != "go").unwrap_or(true) {
            continue;
        }
        if path.to_string_lossy().ends_with("_test.go") {
            continue;
        }
        let Ok(source) = std::fs::read_to_string(path) else {
            continue;
        };
        if !source.contains("func main(") {
            continue;
        }
        if let Some(rel) = path.parent().and_then(|p| p.strip_prefix(repo).ok()) {
            let rel = rel.to_string_lossy();
            dirs.insert(if rel.is_empty() {
                ".".to_string()
            } else {
                format!("./{}", rel)
            });
        }
    }
    dirs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support;
    use tempfile::TempDir;

    #[test]
    fn test_find_build_artifact_prefers_daemon_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("osmosis-extra"), "").unwrap();
        std::fs::write(dir.path().join("osmosisd"), "").unwrap();
        std::fs::create_dir(dir.path().join("osmosis-dir")).unwrap();

        let found = find_build_artifact(dir.path(), "osmosisd", "osmosis").unwrap();
        assert_eq!(found, dir.path().join("osmosisd"));

        let found = find_build_artifact(dir.path(), "other", "osmosis").unwrap();
        assert_eq!(found, dir.path().join("osmosis-extra"));

        assert!(find_build_artifact(dir.path(), "junod", "juno").is_none());
        assert!(find_build_artifact(&dir.path().join("missing"), "x", "y").is_none());
    }

    #[test]
    fn test_find_main_packages() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path();
        let write = |rel: &str, body: &str| {
            let path = repo.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        };

        write("cmd/simd/main.go", "package main\n\nfunc main() {}\n");
        write("app/app.go", "package app\n");
        write("tools/gen/gen.go", "package main\nfunc main() {\n}\n");
        write("vendor/x/main.go", "package main\nfunc main() {}\n");
        write("cmd/simd/main_test.go", "package main\nfunc main() {}\n");

        assert_eq!(
            find_main_packages(repo),
            vec!["./cmd/simd".to_string(), "./tools/gen".to_string()]
        );
    }

    #[test]
    fn test_locate() {
        assert!(Toolchain::locate("").is_none());
        assert!(Toolchain::locate("definitely-not-a-real-tool-7f3a").is_none());
        assert!(Toolchain::locate("/nonexistent/bin/go").is_none());
    }

    #[test]
    fn test_gopath_override() {
        let toolchain = Toolchain {
            gopath: Some(PathBuf::from("/opt/go")),
            ..Default::default()
        };
        assert_eq!(toolchain.gopath_bin(), PathBuf::from("/opt/go/bin"));
    }

    #[cfg(unix)]
    fn context<'a>(
        node: &'a Node,
        repo: &Path,
        gopath_bin: &Path,
        go: &Path,
        make: Option<&Path>,
    ) -> BuildContext<'a> {
        BuildContext {
            node,
            repo: repo.to_path_buf(),
            go: go.to_path_buf(),
            make: make.map(Path::to_path_buf),
            gopath_bin: gopath_bin.to_path_buf(),
            output: repo.join("out"),
        }
    }

    #[cfg(unix)]
    fn tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join("tools").join(name);
        test_support::script(&path, body);
        path
    }

    #[cfg(unix)]
    async fn build_and_install(ctx: &BuildContext<'_>) -> String {
        let built = run_strategies(&default_strategies(), ctx).await.unwrap();
        std::fs::create_dir_all(ctx.node.paths.bin_dir()).unwrap();
        crate::acquire::install_binary(&built, &ctx.node.paths.binary)
            .await
            .unwrap();
        std::fs::read_to_string(&ctx.node.paths.binary).unwrap()
    }

    /// Node, empty repository and GOPATH bin under one temp dir
    #[cfg(unix)]
    fn fixture() -> (TempDir, Node, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let node = test_support::node(dir.path(), "juno", "junod");
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let gopath_bin = dir.path().join("gopath/bin");
        (dir, node, repo, gopath_bin)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cascade_falls_through_to_gopath() {
        let dir = TempDir::new().unwrap();
        let node = test_support::node(dir.path(), "juno", "junod");
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let gopath_bin = dir.path().join("gopath/bin");
        std::fs::create_dir_all(&gopath_bin).unwrap();
        std::fs::write(gopath_bin.join("junod"), "binary").unwrap();

        let ctx = context(&node, &repo, &gopath_bin, Path::new("/bin/false"), None);
        let built = run_strategies(&default_strategies(), &ctx).await.unwrap();
        assert_eq!(built, gopath_bin.join("junod"));

        let log = node.log().contents();
        assert!(log.contains("Build step failed: module build"));
        assert!(log.contains("Build step failed: make install: make is not installed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cascade_exhausted_is_acquisition_error() {
        let dir = TempDir::new().unwrap();
        let node = test_support::node(dir.path(), "juno", "junod");
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();

        let ctx = context(&node, &repo, &dir.path().join("empty"), Path::new("/bin/false"), None);
        let err = run_strategies(&default_strategies(), &ctx).await.unwrap_err();
        match err {
            NodeError::Acquisition(msg) => assert!(msg.contains("gopath fallback")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_readonly_recovery_only_after_marker() {
        let dir = TempDir::new().unwrap();
        let node = test_support::node(dir.path(), "juno", "junod");
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        let ctx = context(&node, &repo, &dir.path().join("empty"), Path::new("/bin/false"), None);

        let unrelated = StepFailure::new("make install", "exit 2");
        assert!(ReadonlyRecovery.attempt(&ctx, Some(&unrelated)).await.is_err());
        assert!(!node.log().contents().contains("DETECTED -mod=readonly"));

        let readonly = StepFailure {
            step: "make install",
            message: "exit 1".into(),
            stderr: format!("go: {}", READONLY_MODFILE_MARKER),
        };
        assert!(ReadonlyRecovery.attempt(&ctx, Some(&readonly)).await.is_err());
        assert!(node.log().contents().contains("DETECTED -mod=readonly"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_root_build_when_main_go_at_root() {
        let (dir, node, repo, gopath_bin) = fixture();
        std::fs::write(repo.join("main.go"), "package main\nfunc main() {}\n").unwrap();
        let go = tool(
            dir.path(),
            "go",
            "if [ \"$1\" = build ] && [ $# -eq 3 ]; then echo root-build > \"$3\"; exit 0; fi\nexit 1",
        );

        let ctx = context(&node, &repo, &gopath_bin, &go, None);
        assert_eq!(build_and_install(&ctx).await, "root-build\n");

        let log = node.log().contents();
        assert!(log.contains("Build step failed: module build"));
        assert!(log.contains("ATTEMPTING BUILD FROM ROOT DIRECTORY"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_make_build_picks_artifact_from_build_dir() {
        let (dir, node, repo, gopath_bin) = fixture();
        let calls = dir.path().join("go-calls");
        let go = tool(
            dir.path(),
            "go",
            &format!("echo \"$@\" >> {}\nexit 1", calls.display()),
        );
        let make = tool(
            dir.path(),
            "make",
            "if [ \"$1\" = build ]; then mkdir -p build; echo make-build > build/junod; exit 0; fi\nexit 1",
        );

        let ctx = context(&node, &repo, &gopath_bin, &go, Some(&make));
        assert_eq!(build_and_install(&ctx).await, "make-build\n");

        // Tidy failing does not stop make
        let calls = std::fs::read_to_string(&calls).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        let module_build = format!("build -o {} ./cmd/junod", repo.join("out").display());
        assert_eq!(calls, vec![module_build.as_str(), "mod tidy"]);
        assert!(node.log().contents().contains("TRYING 'make build'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_make_install_copies_from_gopath() {
        let (dir, node, repo, gopath_bin) = fixture();
        let go = tool(dir.path(), "go", "exit 1");
        let make = tool(
            dir.path(),
            "make",
            &format!(
                "if [ \"$1\" = install ] && [ \"${{GO_MOD_FLAGS-unset}}\" = \"\" ]; then\n  mkdir -p {bin}\n  echo make-install > {bin}/junod\n  exit 0\nfi\nexit 1",
                bin = gopath_bin.display()
            ),
        );

        let ctx = context(&node, &repo, &gopath_bin, &go, Some(&make));
        assert_eq!(build_and_install(&ctx).await, "make-install\n");

        let log = node.log().contents();
        assert!(log.contains("Build step failed: make build"));
        assert!(!log.contains("BINARY FOUND IN GOPATH"));
    }

    #[cfg(unix)]
    fn readonly_make(dir: &Path) -> PathBuf {
        tool(
            dir,
            "make",
            &format!(
                "if [ \"$1\" = install ]; then echo \"go: {}\" 1>&2; fi\nexit 1",
                READONLY_MODFILE_MARKER
            ),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_readonly_recovery_with_go_install() {
        let (dir, node, repo, gopath_bin) = fixture();
        let make = readonly_make(dir.path());
        let go = tool(
            dir.path(),
            "go",
            &format!(
                "if [ \"$1\" = install ] && [ \"$2\" = ./cmd/junod ]; then\n  mkdir -p {bin}\n  echo go-install > {bin}/junod\n  exit 0\nfi\nexit 1",
                bin = gopath_bin.display()
            ),
        );

        let ctx = context(&node, &repo, &gopath_bin, &go, Some(&make));
        assert_eq!(build_and_install(&ctx).await, "go-install\n");

        let log = node.log().contents();
        assert!(log.contains("DETECTED -mod=readonly ERROR"));
        assert!(!log.contains("TRYING BROADER SEARCH"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_readonly_recovery_builds_main_package() {
        let (dir, node, repo, gopath_bin) = fixture();
        std::fs::create_dir_all(repo.join("tools/node")).unwrap();
        std::fs::write(repo.join("tools/node/main.go"), "package main\nfunc main() {}\n").unwrap();
        let make = readonly_make(dir.path());
        let go = tool(
            dir.path(),
            "go",
            "if [ \"$1\" = build ] && [ \"$4\" = ./tools/node ]; then echo main-package > \"$3\"; exit 0; fi\nexit 1",
        );

        let ctx = context(&node, &repo, &gopath_bin, &go, Some(&make));
        assert_eq!(build_and_install(&ctx).await, "main-package\n");
        assert!(node
            .log()
            .contents()
            .contains("Successfully built binary from ./tools/node"));
    }

    #[cfg(unix)]
    fn recording_git(dir: &Path, calls: &Path, body: &str) -> PathBuf {
        tool(dir, "git", &format!("echo \"$@\" >> {}\n{}", calls.display(), body))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_checkout_failure_is_fatal() {
        let (dir, node, repo, _) = fixture();
        let calls = dir.path().join("git-calls");
        let git = recording_git(dir.path(), &calls, "[ \"$1\" = fetch ] && exit 0\nexit 1");

        let err = checkout(&node, &git, &repo, "v9.9.9").await.unwrap_err();
        assert!(matches!(err, NodeError::Acquisition(ref msg) if msg.contains("after fetch")));
        assert_eq!(
            std::fs::read_to_string(&calls).unwrap().lines().collect::<Vec<_>>(),
            vec!["checkout v9.9.9", "fetch --all", "checkout v9.9.9"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_fetch_is_fatal() {
        let (dir, node, repo, _) = fixture();
        let calls = dir.path().join("git-calls");
        let git = recording_git(dir.path(), &calls, "exit 1");

        let err = checkout(&node, &git, &repo, "v9.9.9").await.unwrap_err();
        assert!(matches!(err, NodeError::Acquisition(ref msg) if msg.contains("failed to fetch updates")));
        assert_eq!(
            std::fs::read_to_string(&calls).unwrap().lines().collect::<Vec<_>>(),
            vec!["checkout v9.9.9", "fetch --all"]
        );
    }

    #[test]
    fn test_default_gopath_is_absolute() {
        if std::env::var_os("GOPATH").is_none() {
            let bin = Toolchain::default().gopath_bin();
            assert!(bin.is_absolute());
            assert!(bin.ends_with("go/bin"));
        }
    }
}
