use super::{ClasspathContext, ClasspathEntry, ClasspathStrategy, TargetClasspath};
use crate::error::Result;

/// Fills in what the aspect cannot see: the test runner Bazel adds to every test rule.
///
/// Completes any target that has an aspect record. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImplicitDependencyStrategy;

impl ClasspathStrategy for ImplicitDependencyStrategy {
    fn name(&self) -> &'static str {
        "implicit"
    }

    fn resolve(&self, ctx: &ClasspathContext<'_>, acc: &mut TargetClasspath<'_>) -> Result<()> {
        if ctx.is_test_target(acc.target()) {
            for artifact in &ctx.config.implicit_test_artifacts {
                let path = ctx.workspace_root.join(artifact);
                if path.is_file() {
                    acc.add_entry(ClasspathEntry::main(path).with_test(true));
                } else {
                    tracing::debug!(
                        target: "bef.bazel",
                        label = %acc.target(),
                        path = %path.display(),
                        "implicit test artifact not found"
                    );
                }
            }
        }

        if ctx.info(acc.target()).is_some() {
            acc.mark_complete();
        }
        Ok(())
    }
}
