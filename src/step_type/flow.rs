//! Flow control: step types that own the `subStep` steps following them.

use super::StepType;
use crate::step::Step;
use crate::test_run::TestRun;
use anyhow::{bail, Result};
use tracing::debug;

/// `subStep` of `step`, never past the last step of the case.
fn sub_steps(run: &TestRun, step: &Step) -> usize {
    step.param("subStep")
        .and_then(|n| run.vars().bind(n).trim().parse::<usize>().ok())
        .unwrap_or(0)
        .min(run.remaining_steps())
}

/// Runs the next `subStep` steps `count` times, exposing the 1-based
/// iteration as `_loopCount`.
#[derive(Debug, Clone, Copy)]
pub struct Loop;

impl StepType for Loop {
    fn name(&self) -> &str {
        "loop"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let count: usize = run.string("count")?.trim().parse()?;
        let Some(step) = run.current_step() else {
            bail!("loop executed outside of a step");
        };
        let sub = sub_steps(run, &step);
        let mut success = true;
        for i in 1..=count {
            if run.is_stopped() {
                break;
            }
            debug!("Loop iteration {}/{}", i, count);
            run.put_var("_loopCount", i.to_string());
            success = run.execute_sub_steps(sub)? && success;
        }
        Ok(success)
    }

    fn accept_end_advice(&self) -> bool {
        false
    }

    fn exec_steps(&self, run: &TestRun, step: &Step) -> usize {
        1 + sub_steps(run, step)
    }
}

/// Runs the next `subStep` steps only when `condition` evaluates true.
#[derive(Debug, Clone, Copy)]
pub struct If;

impl StepType for If {
    fn name(&self) -> &str {
        "if"
    }

    fn run(&self, run: &mut TestRun) -> Result<bool> {
        let condition = run.raw_string("condition")?;
        let Some(step) = run.current_step() else {
            bail!("if executed outside of a step");
        };
        if !run.vars().evaluate(&condition) {
            debug!("Condition '{}' is false, skipping block", condition);
            return Ok(true);
        }
        let sub = sub_steps(run, &step);
        Ok(run.execute_sub_steps(sub)?)
    }

    fn accept_end_advice(&self) -> bool {
        false
    }

    fn exec_steps(&self, run: &TestRun, step: &Step) -> usize {
        1 + sub_steps(run, step)
    }
}
