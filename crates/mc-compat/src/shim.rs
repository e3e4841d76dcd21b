//! The compatibility fitter.
//!
//! [`CompatFitter`] is the legacy-facing surface: a command dispatcher,
//! a parameter store adapter and a result projector over the engine's
//! [`Fitter`]. Configuration flows in through commands and `set_*`
//! calls; results flow out through flat projections of the engine-owned
//! [`mc_engine::FitResult`].

use crate::command::Command;
use crate::containers::FitData;
use crate::error::{CompatError, CompatResult};
use crate::fcn::{LegacyFcnAdapter, LegacyFcnCallback};
use crate::intervals;
use mc_core::ModelFunction;
use mc_engine::config::{MinimizerAlgo, ParameterSettings};
use mc_engine::Fitter;
use serde::{Deserialize, Serialize};

/// Full per-parameter info bundle (legacy `GetParameter` shape).
///
/// Before a fit, `error` carries the step size and `lower`/`upper` the
/// configured limits; after a fit they carry the symmetric error and the
/// asymmetric lower/upper errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter name.
    pub name: String,
    /// Best available value.
    pub value: f64,
    /// Step size (pre-fit) or symmetric error (post-fit).
    pub error: f64,
    /// Lower limit (pre-fit) or lower asymmetric error (post-fit).
    pub lower: f64,
    /// Upper limit (pre-fit) or upper asymmetric error (post-fit).
    pub upper: f64,
}

/// Per-parameter error bundle (legacy `GetErrors` shape).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterErrors {
    /// Upper asymmetric error.
    pub plus: f64,
    /// Lower asymmetric error (negative).
    pub minus: f64,
    /// Parabolic (symmetric) error.
    pub parabolic: f64,
    /// Global correlation coefficient.
    pub global_cc: f64,
}

/// Global fit statistics bundle (legacy `GetStats` shape).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitStats {
    /// Objective value at the minimum.
    pub min_fcn_value: f64,
    /// Estimated distance to minimum.
    pub edm: f64,
    /// Error definition (UP) currently configured.
    pub error_def: f64,
    /// Free parameters at fit time.
    pub n_free: usize,
    /// Total parameters at fit time.
    pub n_total: usize,
}

fn require_one_arg(args: &[f64], command: &str) -> CompatResult<f64> {
    args.first()
        .copied()
        .ok_or_else(|| CompatError::Argument(format!("{command} requires [level]")))
}

#[derive(Debug, Default)]
struct CovarianceCache {
    buffer: Vec<f64>,
    /// Result version the buffer was computed against (0 = never).
    version: u64,
}

/// Legacy command-driven fitter over the engine.
///
/// Not internally synchronized: one instance must not be shared across
/// threads without external serialization.
pub struct CompatFitter {
    fitter: Fitter,
    objective: Option<LegacyFcnAdapter>,
    model: Option<Box<dyn ModelFunction>>,
    fit_data: Option<FitData>,
    covar: CovarianceCache,
}

impl Default for CompatFitter {
    fn default() -> Self {
        Self::new()
    }
}

impl CompatFitter {
    /// A fitter with an empty configuration.
    pub fn new() -> Self {
        Self {
            fitter: Fitter::new(),
            objective: None,
            model: None,
            fit_data: None,
            covar: CovarianceCache::default(),
        }
    }

    /// The underlying engine (read-only).
    pub fn engine(&self) -> &Fitter {
        &self.fitter
    }

    /// Attach the legacy objective callback.
    pub fn set_fcn(&mut self, callback: LegacyFcnCallback) {
        let mut adapter = LegacyFcnAdapter::new(callback);
        adapter.set_dimension(self.fitter.config().n_params());
        self.objective = Some(adapter);
    }

    /// Attach the fitted parametric model (used for confidence bands).
    pub fn set_model(&mut self, model: Box<dyn ModelFunction>) {
        self.model = Some(model);
    }

    /// Attach the container that was fitted (confidence-band source).
    pub fn set_fit_data(&mut self, data: FitData) -> CompatResult<()> {
        data.validate()?;
        self.fit_data = Some(data);
        Ok(())
    }

    /// The fitted container, if attached.
    pub fn fit_data(&self) -> Option<&FitData> {
        self.fit_data.as_ref()
    }

    // ── parameter store adapter ─────────────────────────────────────

    /// Total number of configured parameters.
    pub fn n_parameters(&self) -> usize {
        self.fitter.config().n_params()
    }

    /// Insert or overwrite the parameter at `index`, expanding the store
    /// if needed (gap slots are created fixed at zero).
    ///
    /// A step size of exactly 0 marks the parameter fixed; limits are
    /// applied only when `low < high`, strictly.
    pub fn set_parameter(
        &mut self,
        index: usize,
        name: &str,
        value: f64,
        step: f64,
        low: f64,
        high: f64,
    ) -> CompatResult<()> {
        let params = self.fitter.config_mut().params_mut();
        while params.len() < index {
            let mut filler = ParameterSettings::new(format!("p{}", params.len()), 0.0, 0.0);
            filler.fix();
            params.push(filler);
        }

        let mut ps = ParameterSettings::new(name, value, step);
        if step == 0.0 {
            ps.fix();
        }
        ps.set_limits(low, high);

        if index < params.len() {
            params[index] = ps;
        } else {
            params.push(ps);
        }
        self.sync_dimension();
        Ok(())
    }

    /// Fix the parameter at `index`.
    pub fn fix_parameter(&mut self, index: usize) -> CompatResult<()> {
        let i = self.validate_index(index as i64)?;
        self.fitter.config_mut().par_settings_mut(i).expect("validated index").fix();
        Ok(())
    }

    /// Release a previously fixed parameter.
    pub fn release_parameter(&mut self, index: usize) -> CompatResult<()> {
        let i = self.validate_index(index as i64)?;
        self.fitter.config_mut().par_settings_mut(i).expect("validated index").release();
        Ok(())
    }

    /// Whether the parameter at `index` is currently fixed.
    pub fn is_fixed(&self, index: usize) -> CompatResult<bool> {
        let i = self.validate_index(index as i64)?;
        Ok(self.fitter.config().par_settings(i).expect("validated index").is_fixed())
    }

    /// Name of the parameter at `index`.
    pub fn parameter_name(&self, index: usize) -> CompatResult<&str> {
        let i = self.validate_index(index as i64)?;
        Ok(self.fitter.config().par_settings(i).expect("validated index").name())
    }

    /// Best available value: the fit-result value once a fit has run,
    /// the configured initial value otherwise.
    pub fn get_parameter(&self, index: usize) -> CompatResult<f64> {
        let i = self.validate_index(index as i64)?;
        let result = self.fitter.result();
        if result.is_empty() {
            Ok(self.fitter.config().par_settings(i).expect("validated index").value())
        } else {
            Ok(result
                .value(i)
                .unwrap_or_else(|| {
                    self.fitter.config().par_settings(i).expect("validated index").value()
                }))
        }
    }

    /// Legacy sentinel variant of [`get_parameter`](Self::get_parameter):
    /// returns 0 on an invalid index, logging a warning.
    pub fn get_parameter_value(&self, index: usize) -> f64 {
        match self.get_parameter(index) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("GetParameter: {e}");
                0.0
            }
        }
    }

    /// Symmetric error: the step size before a fit, the fitted error
    /// after one.
    pub fn parameter_error(&self, index: usize) -> CompatResult<f64> {
        let i = self.validate_index(index as i64)?;
        let result = self.fitter.result();
        if result.is_empty() {
            Ok(self.fitter.config().par_settings(i).expect("validated index").step_size())
        } else {
            Ok(result.error(i).unwrap_or(0.0))
        }
    }

    /// Full per-parameter bundle (legacy 6-output `GetParameter`).
    pub fn get_parameter_info(&self, index: usize) -> CompatResult<ParameterInfo> {
        let i = self.validate_index(index as i64)?;
        let settings = self.fitter.config().par_settings(i).expect("validated index");
        let result = self.fitter.result();

        if result.is_empty() {
            Ok(ParameterInfo {
                name: settings.name().to_string(),
                value: settings.value(),
                error: settings.step_size(),
                lower: settings.lower_limit(),
                upper: settings.upper_limit(),
            })
        } else {
            Ok(ParameterInfo {
                name: settings.name().to_string(),
                value: result.value(i).unwrap_or(0.0),
                error: result.error(i).unwrap_or(0.0),
                lower: result.lower_error(i).unwrap_or(0.0),
                upper: result.upper_error(i).unwrap_or(0.0),
            })
        }
    }

    // ── result projector ────────────────────────────────────────────

    /// Per-parameter error bundle. Requires a valid fit result.
    pub fn get_errors(&self, index: usize) -> CompatResult<ParameterErrors> {
        let i = self.validate_index(index as i64)?;
        let result = self.fitter.result();
        if !result.is_valid() {
            return Err(CompatError::InvalidResult(
                "errors require a completed, valid fit".to_string(),
            ));
        }
        Ok(ParameterErrors {
            plus: result.upper_error(i).unwrap_or(0.0),
            minus: result.lower_error(i).unwrap_or(0.0),
            parabolic: result.error(i).unwrap_or(0.0),
            global_cc: result.global_cc(i).unwrap_or(0.0),
        })
    }

    /// Global fit statistics. Zeros before the first fit.
    pub fn get_stats(&self) -> FitStats {
        let result = self.fitter.result();
        FitStats {
            min_fcn_value: result.min_fcn_value(),
            edm: result.edm(),
            error_def: self.fitter.config().options.error_def,
            n_free: result.n_free_parameters(),
            n_total: result.n_total_parameters(),
        }
    }

    /// Objective value at the minimum, for legacy chi-square queries.
    ///
    /// Warns when the supplied parameter values are not the fitted ones;
    /// the value at the minimum is returned regardless.
    pub fn chisquare(&self, params: &[f64]) -> CompatResult<f64> {
        let result = self.fitter.result();
        if result.is_empty() {
            return Err(CompatError::InvalidResult("no fit has run yet".to_string()));
        }
        let minpar = result.parameters();
        if params.len() != minpar.len() {
            return Err(CompatError::Argument(format!(
                "expected {} parameter values, got {}",
                minpar.len(),
                params.len()
            )));
        }
        let diff: f64 = params.iter().zip(minpar.iter()).map(|(p, m)| (p - m).abs()).sum();
        let scale: f64 = minpar.iter().map(|m| m.abs()).sum();
        if diff > scale * 1e-12 {
            log::warn!(
                "Chisquare: given parameter values are not at the minimum; value at minimum returned"
            );
        }
        Ok(result.min_fcn_value())
    }

    /// The compressed covariance matrix over free parameters, as a flat
    /// row-major buffer of `(n_free)^2` entries.
    ///
    /// Fixed-parameter rows/columns are compressed out, preserving the
    /// relative order of the free parameters. The buffer is cached and
    /// recomputed only when the result version changes, so repeated
    /// calls without an intervening fit are bit-identical.
    pub fn covariance_matrix(&mut self) -> CompatResult<&[f64]> {
        let result = self.fitter.result();
        if !result.is_valid() {
            return Err(CompatError::InvalidResult(
                "covariance requires a completed, valid fit".to_string(),
            ));
        }

        if self.covar.version != result.version() {
            let n_total = result.n_total_parameters();
            let n_free = result.n_free_parameters();
            let mut buffer = vec![0.0; n_free * n_free];

            let mut l = 0;
            for i in 0..n_total {
                if result.is_parameter_fixed(i) {
                    continue;
                }
                let mut m = 0;
                for j in 0..n_total {
                    if result.is_parameter_fixed(j) {
                        continue;
                    }
                    buffer[n_free * l + m] = result.cov_matrix(i, j).unwrap_or(0.0);
                    m += 1;
                }
                l += 1;
            }

            self.covar.buffer = buffer;
            self.covar.version = result.version();
        }
        Ok(&self.covar.buffer)
    }

    /// One element of the compressed covariance matrix, by free-matrix
    /// indices.
    pub fn covariance_element(&mut self, i: usize, j: usize) -> CompatResult<f64> {
        let n_free = self.fitter.result().n_free_parameters();
        if i >= n_free || j >= n_free {
            return Err(CompatError::Index { index: i.max(j) as i64, total: n_free });
        }
        let buffer = self.covariance_matrix()?;
        Ok(buffer[i * n_free + j])
    }

    /// Print the fit result (level > 0) and covariance (level > 1) to
    /// stdout, legacy style.
    pub fn print_results(&self, level: i32) {
        if level > 0 {
            println!("{}", self.fitter.result());
        }
        if level > 1 {
            println!("{}", self.fitter.result().covariance_summary());
        }
    }

    // ── confidence intervals ────────────────────────────────────────

    /// Compute per-point confidence bands from the attached fitted data
    /// and model, writing values and half-widths into `target`.
    ///
    /// See [`intervals::compute_intervals`] for the compatibility rules.
    pub fn compute_intervals(&self, target: &mut FitData, cl: f64) -> CompatResult<()> {
        let model = self.model.as_ref().ok_or_else(|| {
            CompatError::Configuration("no fitted model attached".to_string())
        })?;
        let source = self.fit_data.as_ref().ok_or_else(|| {
            CompatError::Configuration("no fitted data attached".to_string())
        })?;
        intervals::compute_intervals(self.fitter.result(), model.as_ref(), source, target, cl)
    }

    /// Confidence half-widths at explicit coordinates (legacy raw-array
    /// entry point).
    pub fn compute_intervals_at(&self, points: &[Vec<f64>], cl: f64) -> CompatResult<Vec<f64>> {
        let model = self.model.as_ref().ok_or_else(|| {
            CompatError::Configuration("no fitted model attached".to_string())
        })?;
        intervals::compute_intervals_at(self.fitter.result(), model.as_ref(), points, cl)
    }

    // ── command dispatcher ──────────────────────────────────────────

    /// Execute a legacy command with its numeric argument array.
    pub fn execute_command(&mut self, command: &str, args: &[f64]) -> CompatResult<()> {
        self.sync_dimension();

        let cmd = Command::parse(command)
            .ok_or_else(|| CompatError::UnknownCommand(command.trim().to_string()))?;

        match cmd {
            Command::Migrad => self.run_minimization(MinimizerAlgo::Migrad, args),
            Command::Minimize => self.run_minimization(MinimizerAlgo::Minimize, args),
            Command::Simplex => self.run_minimization(MinimizerAlgo::Simplex, args),
            Command::Scan => self.run_minimization(MinimizerAlgo::Scan, args),

            Command::Minos => {
                // Idempotent: already-enabled MINOS is an immediate success.
                if self.fitter.config().options.minos_errors {
                    return Ok(());
                }
                self.require_objective()?;
                self.fitter.config_mut().options.minos_errors = true;
                self.fitter.config_mut().set_minimizer(MinimizerAlgo::Migrad);
                self.delegate_fit()
            }

            Command::Hesse => {
                if self.fitter.config().options.parab_errors {
                    return Ok(());
                }
                self.require_objective()?;
                self.fitter.config_mut().options.parab_errors = true;
                self.fitter.config_mut().set_minimizer(MinimizerAlgo::Migrad);
                self.delegate_fit()
            }

            Command::Fix => {
                if args.is_empty() {
                    return Err(CompatError::Argument(
                        "FIX requires at least one parameter index".to_string(),
                    ));
                }
                // Indices are 1-based on the legacy surface. Validate
                // all of them before mutating anything.
                let mut indices = Vec::with_capacity(args.len());
                for &a in args {
                    indices.push(self.validate_index(a as i64 - 1)?);
                }
                for i in indices {
                    self.fitter.config_mut().par_settings_mut(i).expect("validated index").fix();
                }
                Ok(())
            }

            Command::SetLimit => {
                if args.len() < 3 {
                    return Err(CompatError::Argument(
                        "SET LIMIT requires [index, low, high]".to_string(),
                    ));
                }
                let i = self.validate_index(args[0] as i64)?;
                // Strictly low < high; equal bounds leave limits untouched.
                self.fitter
                    .config_mut()
                    .par_settings_mut(i)
                    .expect("validated index")
                    .set_limits(args[1], args[2]);
                Ok(())
            }

            Command::SetPrint => {
                let level = require_one_arg(args, "SET PRINT")?;
                self.fitter.config_mut().options.print_level = level as i32;
                Ok(())
            }

            Command::SetError => {
                // The legacy surface mapped SET ERR to the print level,
                // not to the error definition.
                let level = require_one_arg(args, "SET ERR")?;
                self.fitter.config_mut().options.print_level = level as i32;
                Ok(())
            }

            Command::SetStrategy => {
                let level = require_one_arg(args, "SET STRATEGY")?;
                self.fitter.config_mut().options.strategy = level as i32;
                Ok(())
            }

            Command::SetGradient => Err(CompatError::Configuration(
                "gradient mode is not supported".to_string(),
            )),

            Command::CallFcn => {
                if args.is_empty() {
                    return Err(CompatError::Argument("CALL FCN requires [flag]".to_string()));
                }
                let objective = self.require_objective()?;
                let npar = objective.dimension();
                let mut params = Vec::with_capacity(npar);
                for i in 0..npar {
                    params.push(self.get_parameter(i)?);
                }
                objective.call(&params, args[0] as i32);
                Ok(())
            }
        }
    }

    /// Legacy wrapper: 0 on success, -1 on any failure (logged).
    pub fn execute_command_status(&mut self, command: &str, args: &[f64]) -> i32 {
        match self.execute_command(command, args) {
            Ok(()) => 0,
            Err(e) => {
                log::error!("ExecuteCommand({:?}): {e}", command.trim());
                -1
            }
        }
    }

    // ── internals ───────────────────────────────────────────────────

    fn run_minimization(&mut self, algo: MinimizerAlgo, args: &[f64]) -> CompatResult<()> {
        self.require_objective()?;
        {
            let options = &mut self.fitter.config_mut().options;
            if let Some(&max_iter) = args.first() {
                if max_iter > 0.0 {
                    options.max_iter = max_iter as u64;
                }
            }
            if let Some(&tolerance) = args.get(1) {
                if tolerance > 0.0 {
                    options.tolerance = tolerance;
                }
            }
        }
        self.fitter.config_mut().set_minimizer(algo);
        self.delegate_fit()
    }

    fn delegate_fit(&mut self) -> CompatResult<()> {
        let objective = self.objective.as_ref().expect("checked by require_objective");
        let converged = self.fitter.fit_fcn(objective)?;
        if !converged {
            return Err(CompatError::Engine(mc_core::Error::Computation(format!(
                "minimization did not converge: {}",
                self.fitter.result().message()
            ))));
        }
        Ok(())
    }

    fn require_objective(&self) -> CompatResult<&LegacyFcnAdapter> {
        self.objective.as_ref().ok_or_else(|| {
            CompatError::Configuration(
                "objective function must be set before executing this command".to_string(),
            )
        })
    }

    fn validate_index(&self, index: i64) -> CompatResult<usize> {
        let total = self.fitter.config().n_params();
        if index < 0 || index as usize >= total {
            return Err(CompatError::Index { index, total });
        }
        Ok(index as usize)
    }

    fn sync_dimension(&mut self) {
        let n = self.fitter.config().n_params();
        if n == 0 {
            return;
        }
        if let Some(objective) = self.objective.as_mut() {
            objective.set_dimension(n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Quadratic objective with minimum at p_i = i + 1.
    fn quadratic_fcn() -> LegacyFcnCallback {
        Box::new(|_npar, _grad, fval, params, _flag| {
            *fval =
                params.iter().enumerate().map(|(i, &p)| (p - (i as f64 + 1.0)).powi(2)).sum();
        })
    }

    fn two_param_fitter() -> CompatFitter {
        let mut f = CompatFitter::new();
        f.set_parameter(0, "p0", 0.5, 0.1, 0.0, 0.0).unwrap();
        f.set_parameter(1, "p1", 0.5, 0.1, 0.0, 0.0).unwrap();
        f.set_fcn(quadratic_fcn());
        f
    }

    #[test]
    fn test_set_then_get_before_fit() {
        let mut f = CompatFitter::new();
        f.set_parameter(0, "a", 1.25, 0.1, 0.0, 0.0).unwrap();
        assert_eq!(f.get_parameter(0).unwrap(), 1.25);
        assert_eq!(f.parameter_name(0).unwrap(), "a");
        assert_eq!(f.parameter_error(0).unwrap(), 0.1);
    }

    #[test]
    fn test_fix_release_round_trip() {
        let mut f = two_param_fitter();
        f.fix_parameter(1).unwrap();
        assert!(f.is_fixed(1).unwrap());
        f.release_parameter(1).unwrap();
        assert!(!f.is_fixed(1).unwrap());
    }

    #[test]
    fn test_out_of_range_index_is_typed_error() {
        let f = two_param_fitter();
        assert!(matches!(f.is_fixed(7), Err(CompatError::Index { index: 7, total: 2 })));
        assert_eq!(f.get_parameter_value(7), 0.0);
    }

    #[test]
    fn test_zero_step_marks_fixed_regardless_of_bounds() {
        let mut f = CompatFitter::new();
        f.set_parameter(2, "p2", 5.0, 0.0, 0.0, 0.0).unwrap();
        assert!(f.is_fixed(2).unwrap());
        // Gap slots were created fixed as well.
        assert_eq!(f.n_parameters(), 3);
        assert!(f.is_fixed(0).unwrap());
    }

    #[test]
    fn test_set_limit_requires_three_args() {
        let mut f = two_param_fitter();
        f.set_parameter(0, "p0", 1.0, 0.1, 0.0, 2.0).unwrap();
        assert_eq!(f.execute_command_status("SET LIMIT", &[0.0, 5.0]), -1);
        // Bounds unchanged.
        let s = f.engine().config().par_settings(0).unwrap();
        assert_eq!((s.lower_limit(), s.upper_limit()), (0.0, 2.0));
    }

    #[test]
    fn test_set_limit_equal_bounds_not_applied() {
        let mut f = two_param_fitter();
        f.set_parameter(0, "p0", 1.0, 0.1, 0.0, 2.0).unwrap();
        assert_eq!(f.execute_command_status("SET LIM", &[0.0, -1.0, -1.0]), 0);
        let s = f.engine().config().par_settings(0).unwrap();
        assert!(s.has_limits());
        assert_eq!((s.lower_limit(), s.upper_limit()), (0.0, 2.0));
    }

    #[test]
    fn test_unknown_command() {
        let mut f = two_param_fitter();
        assert!(matches!(
            f.execute_command("RELEASE", &[]),
            Err(CompatError::UnknownCommand(_))
        ));
        assert_eq!(f.execute_command_status("RELEASE", &[]), -1);
    }

    #[test]
    fn test_minimization_requires_objective() {
        let mut f = CompatFitter::new();
        f.set_parameter(0, "a", 0.0, 0.1, 0.0, 0.0).unwrap();
        assert!(matches!(
            f.execute_command("MIGRAD", &[]),
            Err(CompatError::Configuration(_))
        ));
        // No side effect: no algorithm selected, no result.
        assert!(f.engine().config().minimizer().is_none());
        assert!(f.engine().result().is_empty());
    }

    #[test]
    fn test_fix_validates_all_indices_before_mutating() {
        let mut f = two_param_fitter();
        // 1-based: index 99 is invalid, so nothing gets fixed.
        assert_eq!(f.execute_command_status("FIX", &[1.0, 99.0]), -1);
        assert!(!f.is_fixed(0).unwrap());
    }

    #[test]
    fn test_fix_uses_one_based_indices() {
        let mut f = two_param_fitter();
        assert_eq!(f.execute_command_status("FIX", &[2.0]), 0);
        assert!(f.is_fixed(1).unwrap());
        assert!(!f.is_fixed(0).unwrap());
    }

    #[test]
    fn test_migrad_end_to_end() {
        let mut f = two_param_fitter();
        assert_eq!(f.execute_command_status("MIGRAD", &[]), 0);
        assert_eq!(f.engine().config().minimizer(), Some(MinimizerAlgo::Migrad));

        assert_relative_eq!(f.get_parameter(0).unwrap(), 1.0, epsilon = 1e-4);
        assert_relative_eq!(f.get_parameter(1).unwrap(), 2.0, epsilon = 1e-4);

        let stats = f.get_stats();
        assert_eq!(stats.n_total, 2);
        assert_eq!(stats.n_free, 2);
        assert!(stats.min_fcn_value < 1e-6);

        let errs = f.get_errors(0).unwrap();
        // chi2 = sum (p_i - c_i)^2 has H = 2I, so sigma = 1 at UP = 1.
        assert_relative_eq!(errs.parabolic, 1.0, epsilon = 1e-3);
        assert_relative_eq!(errs.plus, 1.0, epsilon = 1e-3);
        assert_relative_eq!(errs.minus, -1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_covariance_idempotent_and_sized_by_free_count() {
        let mut f = CompatFitter::new();
        f.set_parameter(0, "p0", 0.5, 0.1, 0.0, 0.0).unwrap();
        f.set_parameter(1, "p1", 0.5, 0.1, 0.0, 0.0).unwrap();
        f.set_parameter(2, "p2", 3.0, 0.1, 0.0, 0.0).unwrap();
        f.fix_parameter(2).unwrap();
        f.set_fcn(quadratic_fcn());
        assert_eq!(f.execute_command_status("MIGRAD", &[]), 0);

        let first = f.covariance_matrix().unwrap().to_vec();
        assert_eq!(first.len(), 4);
        let second = f.covariance_matrix().unwrap().to_vec();
        assert_eq!(first, second);

        assert_relative_eq!(f.covariance_element(0, 0).unwrap(), 1.0, epsilon = 1e-3);
        assert!(f.covariance_element(2, 0).is_err());
    }

    #[test]
    fn test_covariance_requires_valid_result() {
        let mut f = two_param_fitter();
        assert!(matches!(f.covariance_matrix(), Err(CompatError::InvalidResult(_))));
    }

    #[test]
    fn test_minos_and_hesse_idempotent() {
        let mut f = two_param_fitter();
        assert_eq!(f.execute_command_status("MINOS", &[]), 0);
        let version = f.engine().result().version();

        // Second MINOS is a flag-checked no-op: no re-fit.
        assert_eq!(f.execute_command_status("MINOS", &[]), 0);
        assert_eq!(f.engine().result().version(), version);

        assert_eq!(f.execute_command_status("HESSE", &[]), 0);
        let version = f.engine().result().version();
        assert_eq!(f.execute_command_status("HESSE", &[]), 0);
        assert_eq!(f.engine().result().version(), version);
    }

    #[test]
    fn test_set_family_mutates_options() {
        let mut f = two_param_fitter();
        assert_eq!(f.execute_command_status("SET PRINT", &[2.0]), 0);
        assert_eq!(f.engine().config().options.print_level, 2);
        assert_eq!(f.execute_command_status("SET STRATEGY", &[0.0]), 0);
        assert_eq!(f.engine().config().options.strategy, 0);
        assert_eq!(f.execute_command_status("SET GRAD", &[1.0]), -1);
        assert_eq!(f.execute_command_status("SET PRINT", &[]), -1);
    }

    #[test]
    fn test_call_fcn() {
        use std::sync::atomic::{AtomicI32, Ordering};
        use std::sync::Arc;

        let seen_flag = Arc::new(AtomicI32::new(0));
        let seen = seen_flag.clone();

        let mut f = CompatFitter::new();
        f.set_parameter(0, "a", 2.0, 0.1, 0.0, 0.0).unwrap();
        f.set_fcn(Box::new(move |_n, _g, fval, params, flag| {
            seen.store(flag, Ordering::Relaxed);
            *fval = params[0];
        }));

        assert_eq!(f.execute_command_status("CALL FCN", &[3.0]), 0);
        assert_eq!(seen_flag.load(Ordering::Relaxed), 3);
        assert_eq!(f.execute_command_status("CALL FCN", &[]), -1);
    }

    #[test]
    fn test_chisquare_reports_minimum() {
        let mut f = two_param_fitter();
        assert!(f.chisquare(&[1.0, 2.0]).is_err());
        f.execute_command_status("MIGRAD", &[]);
        let chi2 = f.chisquare(&[1.0, 2.0]).unwrap();
        assert!(chi2 < 1e-6);
        assert!(f.chisquare(&[1.0]).is_err());
    }

    #[test]
    fn test_max_iter_and_tolerance_args() {
        let mut f = two_param_fitter();
        assert_eq!(f.execute_command_status("MIGRAD", &[200.0, 1e-8]), 0);
        assert_eq!(f.engine().config().options.max_iter, 200);
        assert_eq!(f.engine().config().options.tolerance, 1e-8);
    }
}
