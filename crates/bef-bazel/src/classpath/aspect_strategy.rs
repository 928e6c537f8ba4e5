use super::{ClasspathContext, ClasspathEntry, ClasspathStrategy, TargetClasspath};
use crate::{
    aspect::{AspectTargetInfo, DependencyKind, JarArtifact},
    error::Result,
    label::TargetLabel,
};
use indexmap::IndexMap;

/// Classpath from aspect records: the target's generated jars plus the jars of everything it
/// transitively depends on outside the project's own packages.
#[derive(Debug, Default, Clone, Copy)]
pub struct AspectClasspathStrategy;

impl AspectClasspathStrategy {
    /// Labels reachable from `root` in first-visited order, each mapped to whether some path
    /// to it uses compile edges only.
    fn reachable<'a>(
        ctx: &ClasspathContext<'a>,
        root: &'a AspectTargetInfo,
    ) -> IndexMap<&'a TargetLabel, bool> {
        let mut seen: IndexMap<&'a TargetLabel, bool> = IndexMap::new();
        let mut queue: Vec<(&'a AspectTargetInfo, bool)> = vec![(root, true)];
        let mut next = 0;
        while let Some((info, compile_path)) = queue.get(next).copied() {
            next += 1;
            for dep in &info.deps {
                if dep.label == root.label {
                    continue;
                }
                let compile = compile_path && dep.kind == DependencyKind::Compile;
                match seen.get_mut(&dep.label) {
                    None => {
                        seen.insert(&dep.label, compile);
                    }
                    // A compile path found later upgrades a runtime-only label.
                    Some(known) if compile && !*known => *known = true,
                    Some(_) => continue,
                }
                if let Some(dep_info) = ctx.info(&dep.label) {
                    queue.push((&**dep_info, compile));
                }
            }
        }
        seen
    }

    fn entry(ctx: &ClasspathContext<'_>, jar: &JarArtifact) -> Option<ClasspathEntry> {
        let binary = ctx.resolve(jar.binary()?);
        let source = jar.source_jar.as_ref().map(|source| ctx.resolve(source));
        Some(ClasspathEntry::main(binary).with_source(source))
    }
}

impl ClasspathStrategy for AspectClasspathStrategy {
    fn name(&self) -> &'static str {
        "aspect"
    }

    fn resolve(&self, ctx: &ClasspathContext<'_>, acc: &mut TargetClasspath<'_>) -> Result<()> {
        let Some(info) = ctx.info(acc.target()) else {
            tracing::debug!(target: "bef.bazel", label = %acc.target(), "no aspect record for target");
            return Ok(());
        };
        let test = info.is_test_rule();

        for jar in &info.generated_outputs {
            if let Some(entry) = Self::entry(ctx, jar) {
                acc.add_entry(entry.with_test(test));
            }
        }

        for (label, compile) in Self::reachable(ctx, info) {
            if ctx.is_project_package(label) || label.same_package(&info.label) {
                continue;
            }
            let Some(dep) = ctx.info(label) else {
                continue;
            };
            let runtime = !compile;
            for jar in dep.outputs.iter().chain(&dep.generated_outputs) {
                if let Some(entry) = Self::entry(ctx, jar) {
                    acc.add_entry(entry.with_test(test).with_runtime(runtime));
                }
            }
        }

        // Bazel injects the test runner into test rules without the aspect seeing it.
        if !test {
            acc.mark_complete();
        }
        Ok(())
    }
}
