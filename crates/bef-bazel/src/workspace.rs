use crate::{
    aspect::{AspectParser, AspectTargetInfo},
    classpath::{
        CachedClasspath, ClasspathContext, ClasspathProject, ClasspathResult,
        ClasspathStrategyChain,
    },
    command::{CommandOutput, CommandRunner, DefaultCommandRunner},
    error::{BazelError, Result},
    graph::{DependencyGraph, DependencyGraphBuilder, GraphGranularity},
    label::{PackageLocation, TargetLabel},
    problems::{parse_problems, BazelProblem},
    query::{package_rules_expression, parse_label_kind_output, BuildFileModel},
    registry::{caches_for_workspace, WorkspaceCaches},
};
use bef_config::{BefConfig, WildcardTestPolicy};
use bef_process::{CancellationToken, OutputStream};
use indexmap::{IndexMap, IndexSet};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

const WORKSPACE_MARKERS: [&str; 4] = ["WORKSPACE", "WORKSPACE.bazel", "MODULE.bazel", "REPO.bazel"];

/// Walk upwards from `start` to find the Bazel workspace root.
pub fn bazel_workspace_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    let start = start.as_ref();
    let mut dir = if start.is_file() {
        start.parent()?
    } else {
        start
    };

    loop {
        if is_bazel_workspace(dir) {
            return Some(dir.to_path_buf());
        }
        dir = dir.parent()?;
    }
}

pub fn is_bazel_workspace(root: &Path) -> bool {
    WORKSPACE_MARKERS
        .iter()
        .any(|marker| root.join(marker).is_file())
}

/// Activated targets after wildcard expansion.
#[derive(Debug, Clone, Default)]
pub struct TargetExpansion {
    pub targets: Vec<TargetLabel>,
    /// Rule kinds learned from package listings along the way.
    pub rule_kinds: HashMap<TargetLabel, String>,
    pub problems: Vec<BazelProblem>,
}

/// Aspect records for some targets and everything they depend on.
#[derive(Debug, Clone, Default)]
pub struct AspectLoad {
    pub infos: IndexMap<TargetLabel, Arc<AspectTargetInfo>>,
    /// At least one record came from the last-known-good tier.
    pub degraded: bool,
    pub problems: Vec<BazelProblem>,
}

/// Aspect files reported by one `bazel build --aspects=...` invocation.
#[derive(Debug, Clone, Default)]
pub struct AspectBuild {
    pub files: Vec<PathBuf>,
    pub success: bool,
    pub problems: Vec<BazelProblem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub problems: Vec<BazelProblem>,
}

/// Entry point for resolving targets, graphs and classpaths in one Bazel workspace.
#[derive(Debug)]
pub struct BazelWorkspace<R: CommandRunner = DefaultCommandRunner> {
    root: PathBuf,
    config: BefConfig,
    runner: R,
    parser: AspectParser,
    chain: ClasspathStrategyChain,
    caches: Arc<WorkspaceCaches>,
    execution_root: OnceCell<PathBuf>,
}

impl BazelWorkspace<DefaultCommandRunner> {
    /// Open the workspace at `root` with its discovered `bef.toml` and the process-wide caches.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = BefConfig::discover(&root)?;
        let runner = DefaultCommandRunner::from_config(&config.bazel);
        Ok(Self::shared(root, config, runner))
    }
}

impl<R: CommandRunner> BazelWorkspace<R> {
    /// A workspace with caches of its own.
    pub fn new(root: impl Into<PathBuf>, config: BefConfig, runner: R) -> Self {
        Self {
            root: root.into(),
            config,
            runner,
            parser: AspectParser::default(),
            chain: ClasspathStrategyChain::default(),
            caches: Arc::new(WorkspaceCaches::new()),
            execution_root: OnceCell::new(),
        }
    }

    /// A workspace using the caches registered for its root, shared with every other
    /// workspace opened on the same root.
    pub fn shared(root: impl Into<PathBuf>, config: BefConfig, runner: R) -> Self {
        let workspace = Self::new(root, config, runner);
        let caches = caches_for_workspace(&workspace.root);
        workspace.with_caches(caches)
    }

    pub fn with_caches(mut self, caches: Arc<WorkspaceCaches>) -> Self {
        self.caches = caches;
        self
    }

    pub fn with_parser(mut self, parser: AspectParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_strategy_chain(mut self, chain: ClasspathStrategyChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &BefConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<WorkspaceCaches> {
        &self.caches
    }

    fn bazel(&self, args: &[String], cancellation: Option<&CancellationToken>) -> Result<CommandOutput> {
        let program = &self.config.bazel.executable;
        tracing::debug!(
            target: "bef.bazel",
            program = %program.display(),
            args = ?args,
            "running bazel"
        );
        let output = self
            .runner
            .run_cancellable(&self.root, program, args, cancellation)?;
        tracing::debug!(
            target: "bef.bazel",
            subcommand = args.first().map(String::as_str).unwrap_or_default(),
            exit_code = ?output.exit_code,
            "bazel finished"
        );
        Ok(output)
    }

    fn command_failed(subcommand: &str, output: &CommandOutput) -> BazelError {
        BazelError::CommandFailed {
            subcommand: subcommand.to_string(),
            exit_code: output.exit_code,
            problems: parse_problems(&output.stderr),
        }
    }

    /// Bazel's execution root, from config or `bazel info execution_root`; computed once.
    pub fn execution_root(&self) -> Result<&Path> {
        self.execution_root
            .get_or_try_init(|| {
                if let Some(path) = &self.config.bazel.execution_root {
                    return Ok(self.root.join(path));
                }
                let args = vec!["info".to_string(), "execution_root".to_string()];
                let output = self.bazel(&args, None)?;
                if !output.success() {
                    return Err(Self::command_failed("info", &output));
                }
                output
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .last()
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        BazelError::Message("`bazel info execution_root` printed nothing".into())
                    })
            })
            .map(PathBuf::as_path)
    }

    /// Run `bazel query <expression> --output label_kind` and parse the rules it lists.
    fn query_label_kind(&self, expression: String, package: &TargetLabel) -> Result<BuildFileModel> {
        let args = vec![
            "query".to_string(),
            expression,
            "--output".to_string(),
            "label_kind".to_string(),
        ];
        let output = self.bazel(&args, None)?;
        if !output.success() {
            return Err(Self::command_failed("query", &output));
        }
        Ok(parse_label_kind_output(package, &output.stdout))
    }

    /// Rule targets of `package`, cached per package.
    pub fn list_targets(&self, package: &TargetLabel) -> Result<Arc<BuildFileModel>> {
        self.caches.queries.get_or_query(package, |package| {
            self.query_label_kind(package_rules_expression(package), package)
        })
    }

    fn keep_in_wildcard(&self, kind: &str) -> bool {
        match self.config.classpath.wildcard_tests {
            WildcardTestPolicy::Include => true,
            WildcardTestPolicy::Exclude => !kind.ends_with("_test"),
        }
    }

    fn expand_recursive(&self, pattern: &TargetLabel) -> Result<BuildFileModel> {
        let package = pattern.package_label();
        self.query_label_kind(format!("kind(rule, {package})"), &package)
    }

    /// Replace wildcards in `targets` by the rule targets they denote.
    ///
    /// Test rules found through a wildcard are kept or dropped according to
    /// `classpath.wildcard_tests`. A package that cannot be listed is reported as a problem.
    pub fn expand_targets(&self, targets: &[TargetLabel]) -> Result<TargetExpansion> {
        let mut expansion = TargetExpansion::default();
        let mut expanded: IndexSet<TargetLabel> = IndexSet::new();

        for target in targets {
            if !target.is_wildcard() {
                let target = match target.explicit_target() {
                    None if !target.is_root_package() => target.with_target(target.target_name()),
                    _ => target.clone(),
                };
                expanded.insert(target);
                continue;
            }

            let key = if target.is_recursive_wildcard() {
                target.clone()
            } else {
                target.package_wildcard()
            };
            if let Some(members) = self.caches.aspects.wildcard_members(&key) {
                expanded.extend(members.iter().cloned());
                if let Some(model) = self.caches.queries.get(&key) {
                    expansion.rule_kinds.extend(model.targets.clone());
                }
                continue;
            }

            let model = if target.is_recursive_wildcard() {
                self.expand_recursive(target).map(Arc::new)
            } else {
                self.list_targets(&target.package_label())
            };
            let model = match model {
                Ok(model) => model,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        target: "bef.bazel",
                        pattern = %target,
                        error = %err,
                        "failed to expand target pattern"
                    );
                    let mut problems = err.problems().to_vec();
                    if problems.is_empty() {
                        problems.push(BazelProblem::for_target(target.clone(), err.to_string()));
                    }
                    expansion.problems.extend(problems);
                    continue;
                }
            };

            let members: Vec<TargetLabel> = model
                .targets
                .iter()
                .filter(|(_, kind)| self.keep_in_wildcard(kind))
                .map(|(label, _)| label.clone())
                .collect();
            let members = self.caches.aspects.put_wildcard(key, members);
            expanded.extend(members.iter().cloned());
            expansion.rule_kinds.extend(model.targets.clone());
        }

        expansion.targets = expanded.into_iter().collect();
        Ok(expansion)
    }

    /// Run the aspect over `targets` and collect the aspect files Bazel reports.
    ///
    /// Runs with `--keep_going`, so a failing build still yields files for the targets that
    /// succeeded; it is an error only when nothing was produced.
    pub fn build_aspects(
        &self,
        targets: &[TargetLabel],
        cancellation: Option<&CancellationToken>,
    ) -> Result<AspectBuild> {
        let aspect = &self.config.aspect;
        let mut args = vec![
            "build".to_string(),
            "--keep_going".to_string(),
            format!("--aspects={}", aspect.aspect),
            format!("--output_groups={}", aspect.output_group),
        ];
        args.extend(self.config.bazel.build_flags.iter().cloned());
        args.extend(targets.iter().map(ToString::to_string));

        let output = self.bazel(&args, cancellation)?;
        let suffix = aspect.file_suffix.as_str();
        let mut files: IndexSet<PathBuf> = IndexSet::new();
        for line in output.select_lines(OutputStream::Both, |line| {
            let line = line.trim();
            line.ends_with(suffix).then(|| line.to_string())
        }) {
            let path = PathBuf::from(line);
            files.insert(if path.is_absolute() {
                path
            } else {
                self.root.join(path)
            });
        }

        let problems = parse_problems(&output.stderr);
        if !output.success() && files.is_empty() {
            return Err(BazelError::CommandFailed {
                subcommand: "build".to_string(),
                exit_code: output.exit_code,
                problems,
            });
        }

        tracing::debug!(
            target: "bef.bazel",
            targets = targets.len(),
            files = files.len(),
            success = output.success(),
            "aspect build finished"
        );
        Ok(AspectBuild {
            files: files.into_iter().collect(),
            success: output.success(),
            problems,
        })
    }

    /// Walk `roots` and their dependencies through the current tier (and the last-known-good
    /// tier when `fallback` is set), recording labels found nowhere in `missing`.
    fn collect_infos(
        &self,
        roots: &[TargetLabel],
        fallback: bool,
        load: &mut AspectLoad,
        missing: &mut IndexSet<TargetLabel>,
    ) {
        let cache = &self.caches.aspects;
        let mut queue: Vec<TargetLabel> = roots.to_vec();
        let mut seen: IndexSet<TargetLabel> = IndexSet::new();
        let mut next = 0;
        while let Some(label) = queue.get(next).cloned() {
            next += 1;
            if !seen.insert(label.clone()) {
                continue;
            }
            let info = match cache.peek(&label) {
                Some(info) => Some(info),
                None if fallback => {
                    let info = cache.fallback(&label);
                    load.degraded |= info.is_some();
                    info
                }
                None => None,
            };
            match info {
                Some(info) => {
                    queue.extend(info.dependency_labels().cloned());
                    load.infos.insert(label, info);
                }
                None => {
                    missing.insert(label);
                }
            }
        }
    }

    /// Aspect records for `targets` and their transitive dependencies.
    ///
    /// Records come from the current tier; anything missing is built with the aspect and
    /// cached. When that fails, records are served from the last-known-good tier and the load
    /// is marked degraded. Targets with no record anywhere are reported as problems.
    pub fn load_aspect_infos(
        &self,
        targets: &[TargetLabel],
        cancellation: Option<&CancellationToken>,
    ) -> Result<AspectLoad> {
        let cache = &self.caches.aspects;
        for target in targets {
            cache.get(target);
        }

        let mut load = AspectLoad::default();
        let mut missing = IndexSet::new();
        self.collect_infos(targets, false, &mut load, &mut missing);
        if missing.is_empty() {
            return Ok(load);
        }

        // Labels a successful build already covered stay graph leaves until a flush.
        let to_build: Vec<TargetLabel> = missing
            .into_iter()
            .filter(|label| !cache.is_undescribed(label))
            .collect();
        let built = if to_build.is_empty() {
            Ok(AspectBuild {
                success: true,
                ..AspectBuild::default()
            })
        } else {
            self.build_aspects(&to_build, cancellation)
        };
        match built {
            Ok(build) => {
                load.problems.extend(build.problems);
                let batch = self.parser.parse_batch(&build.files);
                for failure in batch.failures {
                    load.problems.push(BazelProblem {
                        target: None,
                        file: Some(failure.path),
                        line: None,
                        message: failure.error.to_string(),
                    });
                }
                for info in batch.infos {
                    cache.put(info.label.clone(), info);
                }
                if build.success {
                    // The aspect follows deps, so whatever is still uncovered has no record to give.
                    let mut uncovered = IndexSet::new();
                    self.collect_infos(targets, false, &mut AspectLoad::default(), &mut uncovered);
                    for label in uncovered {
                        cache.mark_undescribed(label);
                    }
                }
            }
            Err(err) if err.is_fatal() || matches!(err, BazelError::Cancelled { .. }) => {
                return Err(err)
            }
            Err(err) => {
                tracing::warn!(
                    target: "bef.bazel",
                    targets = to_build.len(),
                    error = %err,
                    "aspect build failed; falling back to last-known-good records"
                );
                let mut problems = err.problems().to_vec();
                if problems.is_empty() {
                    problems.push(BazelProblem::message(err.to_string()));
                }
                load.problems.extend(problems);
            }
        }

        let mut missing = IndexSet::new();
        load.infos.clear();
        self.collect_infos(targets, true, &mut load, &mut missing);
        for label in missing {
            if targets.contains(&label) {
                let reported = load
                    .problems
                    .iter()
                    .any(|problem| problem.target.as_ref() == Some(&label));
                if !reported {
                    load.problems.push(BazelProblem::for_target(
                        label,
                        "bazel produced no aspect output for target",
                    ));
                }
            } else {
                tracing::debug!(target: "bef.bazel", label = %label, "dependency has no aspect record");
            }
        }
        Ok(load)
    }

    /// Dependency graph over `targets` (wildcards allowed) and their dependencies.
    pub fn dependency_graph(
        &self,
        targets: &[TargetLabel],
        granularity: GraphGranularity,
        cancellation: Option<&CancellationToken>,
    ) -> Result<DependencyGraph> {
        let expansion = self.expand_targets(targets)?;
        let load = self.load_aspect_infos(&expansion.targets, cancellation)?;
        let graph = DependencyGraphBuilder::new(granularity).build(load.infos.values().map(|info| &**info));
        tracing::debug!(
            target: "bef.bazel",
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            degraded = load.degraded,
            "built dependency graph"
        );
        Ok(graph)
    }

    /// `packages` ordered so every package comes after the packages it depends on.
    pub fn order_packages(
        &self,
        packages: &[PackageLocation],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<PackageLocation>> {
        let targets: Vec<TargetLabel> = packages
            .iter()
            .map(|package| package.label().package_wildcard())
            .collect();
        let graph = self.dependency_graph(&targets, GraphGranularity::Package, cancellation)?;
        Ok(graph.order_labels(packages))
    }

    /// The classpath of `project`, cached until a flush.
    pub fn resolve_classpath(
        &self,
        project: &ClasspathProject,
        cancellation: Option<&CancellationToken>,
    ) -> Result<CachedClasspath> {
        self.caches
            .classpaths
            .get_or_compute(&project.name, || self.compute_classpath(project, cancellation))
    }

    fn compute_classpath(
        &self,
        project: &ClasspathProject,
        cancellation: Option<&CancellationToken>,
    ) -> Result<ClasspathResult> {
        let expansion = self.expand_targets(&project.targets)?;
        let load = self.load_aspect_infos(&expansion.targets, cancellation)?;
        let execution_root = self.execution_root()?;
        let project_packages: IndexSet<PackageLocation> = project.packages.iter().cloned().collect();

        let ctx = ClasspathContext {
            workspace_root: &self.root,
            execution_root,
            project_packages: &project_packages,
            infos: &load.infos,
            rule_kinds: &expansion.rule_kinds,
            config: &self.config.classpath,
        };
        let mut result = self.chain.resolve(&ctx, &expansion.targets, cancellation)?;
        result.degraded = load.degraded;

        let mut problems = expansion.problems;
        problems.extend(load.problems);
        problems.append(&mut result.problems);
        result.problems = problems;

        tracing::info!(
            target: "bef.bazel",
            project = %project.name,
            targets = expansion.targets.len(),
            entries = result.len(),
            complete = result.complete,
            degraded = result.degraded,
            "resolved classpath"
        );
        Ok(result)
    }

    /// Forget what is known about one package after its BUILD file changed.
    pub fn flush_cache(&self, package: &PackageLocation) {
        self.caches.aspects.flush_package(package);
        self.caches.queries.flush(&package.label());
        self.caches.classpaths.invalidate_all();
        tracing::debug!(target: "bef.bazel", package = %package, "flushed package caches");
    }

    /// Drop current aspect records and cached classpaths; last-known-good records stay.
    pub fn flush_aspect_info_cache(&self) {
        self.caches.aspects.flush_current();
        self.caches.classpaths.invalidate_all();
    }

    /// Drop every cached record, last-known-good included.
    pub fn clean(&self) {
        self.caches.aspects.flush_all();
        self.caches.queries.flush_all();
        self.caches.classpaths.invalidate_all();
        tracing::info!(target: "bef.bazel", root = %self.root.display(), "cleaned workspace caches");
    }

    /// Plain `bazel build`; failures come back as problems, not errors.
    pub fn build(
        &self,
        targets: &[TargetLabel],
        cancellation: Option<&CancellationToken>,
    ) -> Result<BuildOutcome> {
        let mut args = vec!["build".to_string()];
        args.extend(self.config.bazel.build_flags.iter().cloned());
        args.extend(targets.iter().map(ToString::to_string));

        let output = self.bazel(&args, cancellation)?;
        let mut problems = parse_problems(&output.stderr);
        problems.extend(parse_problems(&output.stdout));
        Ok(BuildOutcome {
            success: output.success(),
            exit_code: output.exit_code,
            problems,
        })
    }
}
