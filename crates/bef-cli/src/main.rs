use anyhow::{Context, Result};
use bef_bazel::{
    bazel_workspace_root, BazelProblem, BazelWorkspace, BuildFileModel, BuildOutcome,
    ClasspathProject, ClasspathResult, DefaultCommandRunner, DependencyGraph, GraphGranularity,
    PackageLocation, TargetLabel,
};
use bef_config::{init_tracing, BefConfig};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "bef",
    version,
    about = "Resolve Bazel targets, dependency graphs and classpaths through an IDE aspect"
)]
struct Cli {
    /// Workspace root, or any directory inside it (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,
    /// Config file to use instead of `<workspace>/bef.toml`
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit JSON suitable for CI
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the rule targets of a package
    Targets(TargetsArgs),
    /// Expand target patterns (`//pkg:*`, `//pkg/...`) into rule targets
    Expand(PatternArgs),
    /// Resolve the classpath of a set of packages and targets
    Classpath(ClasspathArgs),
    /// Order packages so dependencies come first
    Order(OrderArgs),
    /// Print the dependency graph of some targets
    Graph(GraphArgs),
    /// Run `bazel build` and report problems
    Build(PatternArgs),
}

#[derive(Args)]
struct TargetsArgs {
    /// Package label, e.g. `//projects/libs/foo`
    package: TargetLabel,
}

#[derive(Args)]
struct PatternArgs {
    #[arg(required = true)]
    targets: Vec<TargetLabel>,
}

#[derive(Args)]
struct ClasspathArgs {
    /// Project packages (workspace-relative paths); each also activates `//<package>:*`
    #[arg(long = "package")]
    packages: Vec<String>,
    /// Additional targets to activate
    targets: Vec<TargetLabel>,
    /// Name the result is cached under (defaults to the first package)
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args)]
struct OrderArgs {
    /// Workspace-relative package paths
    #[arg(required = true)]
    packages: Vec<String>,
}

#[derive(Args)]
struct GraphArgs {
    #[arg(required = true)]
    targets: Vec<TargetLabel>,
    /// Collapse targets into their packages
    #[arg(long)]
    packages: bool,
    /// Only print labels nothing depends on
    #[arg(long, conflicts_with = "leaves")]
    roots: bool,
    /// Only print labels that depend on nothing
    #[arg(long)]
    leaves: bool,
    /// Keep external repository labels when printing leaves
    #[arg(long)]
    include_external: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn open_workspace(cli: &Cli) -> Result<BazelWorkspace> {
    let root = bazel_workspace_root(&cli.workspace).with_context(|| {
        format!(
            "{} is not inside a Bazel workspace (no WORKSPACE or MODULE.bazel found)",
            cli.workspace.display()
        )
    })?;
    let config = match &cli.config {
        Some(path) => BefConfig::load_from_path(path)?,
        None => BefConfig::discover(&root)?,
    };
    init_tracing(&config.logging);

    let runner = DefaultCommandRunner::from_config(&config.bazel);
    Ok(BazelWorkspace::shared(root, config, runner))
}

fn run(cli: Cli) -> Result<i32> {
    let ws = open_workspace(&cli)?;
    match cli.command {
        Command::Targets(args) => {
            let model = ws.list_targets(&args.package)?;
            if cli.json {
                print_json(&*model)?;
            } else {
                print_targets(&model);
            }
            Ok(0)
        }
        Command::Expand(args) => {
            let expansion = ws.expand_targets(&args.targets)?;
            let exit = if expansion.problems.is_empty() { 0 } else { 1 };
            if cli.json {
                print_json(&ExpansionReport {
                    targets: &expansion.targets,
                    problems: &expansion.problems,
                })?;
            } else {
                for target in &expansion.targets {
                    println!("{target}");
                }
                print_problems(&expansion.problems);
            }
            Ok(exit)
        }
        Command::Classpath(args) => {
            let project = classpath_project(args)?;
            let cached = ws.resolve_classpath(&project, None)?;
            let exit = if cached.result.complete { 0 } else { 1 };
            if cli.json {
                print_json(&*cached.result)?;
            } else {
                print_classpath(&cached.result);
            }
            Ok(exit)
        }
        Command::Order(args) => {
            let packages: Vec<PackageLocation> =
                args.packages.iter().map(PackageLocation::new).collect();
            let ordered = ws.order_packages(&packages, None)?;
            if cli.json {
                print_json(&ordered)?;
            } else {
                for package in &ordered {
                    println!("{package}");
                }
            }
            Ok(0)
        }
        Command::Graph(args) => {
            let granularity = if args.packages {
                GraphGranularity::Package
            } else {
                GraphGranularity::Target
            };
            let graph = ws.dependency_graph(&args.targets, granularity, None)?;
            if args.roots || args.leaves {
                let labels: Vec<TargetLabel> = if args.roots {
                    graph.root_labels().into_iter().collect()
                } else {
                    graph.leaf_labels(!args.include_external).into_iter().collect()
                };
                if cli.json {
                    print_json(&labels)?;
                } else {
                    for label in &labels {
                        println!("{label}");
                    }
                }
            } else if cli.json {
                print_json(&GraphReport::new(&graph))?;
            } else {
                for (from, to) in graph.edges() {
                    println!("{from} -> {to}");
                }
            }
            Ok(0)
        }
        Command::Build(args) => {
            let outcome = ws.build(&args.targets, None)?;
            let exit = if outcome.success { 0 } else { 1 };
            if cli.json {
                print_json(&outcome)?;
            } else {
                print_build(&outcome);
            }
            Ok(exit)
        }
    }
}

fn classpath_project(args: ClasspathArgs) -> Result<ClasspathProject> {
    let packages: Vec<PackageLocation> = args.packages.iter().map(PackageLocation::new).collect();
    let name = match (args.name, packages.first(), args.targets.first()) {
        (Some(name), _, _) => name,
        (None, Some(package), _) => package.label().to_string(),
        (None, None, Some(target)) => target.to_string(),
        (None, None, None) => anyhow::bail!("classpath needs at least one --package or target"),
    };

    let mut project = ClasspathProject::new(name);
    for package in packages {
        let wildcard = package.label().package_wildcard();
        project = project.with_package(package).with_target(wildcard);
    }
    for target in args.targets {
        project = project.with_target(target);
    }
    Ok(project)
}

#[derive(Serialize)]
struct ExpansionReport<'a> {
    targets: &'a [TargetLabel],
    problems: &'a [BazelProblem],
}

#[derive(Serialize)]
struct GraphReport<'a> {
    nodes: Vec<&'a TargetLabel>,
    edges: Vec<(&'a TargetLabel, &'a TargetLabel)>,
}

impl<'a> GraphReport<'a> {
    fn new(graph: &'a DependencyGraph) -> Self {
        Self {
            nodes: graph.labels().collect(),
            edges: graph.edges().collect(),
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

fn print_targets(model: &BuildFileModel) {
    if !model.is_buildable() {
        println!("{}: no rule targets", model.package);
        return;
    }
    for (label, kind) in &model.targets {
        println!("{kind} {label}");
    }
}

fn print_classpath(result: &ClasspathResult) {
    for entry in &result.entries {
        let mut flags = Vec::new();
        if entry.test {
            flags.push("test");
        }
        if entry.runtime {
            flags.push("runtime");
        }
        if flags.is_empty() {
            println!("{}", entry.binary.display());
        } else {
            println!("{} [{}]", entry.binary.display(), flags.join(","));
        }
    }
    for target in &result.unresolved {
        println!("unresolved: {target}");
    }
    if result.degraded {
        println!("note: some entries come from an earlier successful build");
    }
    print_problems(&result.problems);
}

fn print_build(outcome: &BuildOutcome) {
    print_problems(&outcome.problems);
    match (outcome.success, outcome.exit_code) {
        (true, _) => println!("build: ok"),
        (false, Some(code)) => println!("build: failed (exit code {code})"),
        (false, None) => println!("build: failed"),
    }
}

fn print_problems(problems: &[BazelProblem]) {
    for problem in problems {
        println!("error: {problem}");
    }
}
