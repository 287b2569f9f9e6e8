//! Stage lifecycle and the `needs` barrier.

use super::Executor;
use crate::cancel::CancelToken;
use crate::constants::ENV_STEP_STAGE;
use crate::error::{Error, Result};
use crate::output::step_prefix;
use crate::pipeline::Stage;
use crate::signal::StageMap;
use tracing::{debug, error};

impl Executor {
    /// Tags every step with the stage name and creates it.
    pub(crate) async fn create_stage(&self, token: &CancelToken, stage: &mut Stage) -> Result<()> {
        for ctn in &mut stage.steps {
            ctn.environment
                .insert(ENV_STEP_STAGE.to_string(), stage.name.clone());

            self.log_output(&format!(
                "{} > Preparing step image {}",
                step_prefix(Some(&stage.name), &ctn.name),
                ctn.image
            ));

            self.create_step(token, ctn)
                .await
                .map_err(|e| Error::unit("create", "step", &ctn.name, e))?;
        }
        Ok(())
    }

    /// Blocks until every stage in `needs` completed.
    ///
    /// Needs that are not registered in `map` count as satisfied.
    pub(crate) async fn plan_stage(&self, token: &CancelToken, stage: &Stage, map: &StageMap) -> Result<()> {
        for needs in &stage.needs {
            let Some(signal) = map.get(needs) else {
                continue;
            };

            debug!(stage = %stage.name, needs = %needs, "Waiting on stage");
            if let Some(reason) = signal.wait(token).await? {
                return Err(Error::StageDependency {
                    stage: stage.name.clone(),
                    needs: needs.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Runs a stage's steps in order, then completes the stage's signal.
    pub(crate) async fn exec_stage(&self, token: &CancelToken, stage: &mut Stage, map: &StageMap) -> Result<()> {
        let guard = map.register(&stage.name).guard();
        let result = async {
            for ctn in &mut stage.steps {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                self.run_step(token, ctn).await?;
            }
            Ok(())
        }
        .await;

        guard.complete(result.as_ref().err().map(ToString::to_string));

        result
    }

    /// Destroys every step in the stage, returning the first failure.
    pub(crate) async fn destroy_stage(&self, token: &CancelToken, stage: &mut Stage) -> Result<()> {
        let mut first = None;
        for ctn in &mut stage.steps {
            if let Err(e) = self.destroy_step(token, ctn).await {
                error!(stage = %stage.name, step = %ctn.name, error = %e, "Unable to destroy step");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
