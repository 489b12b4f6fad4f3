//! Regression and stationarity helpers shared by the fair-value models and
//! the signal generator.

use nalgebra::{DMatrix, DVector};

const FLAT_EPS: f64 = 1e-9;

/// Intercept and slope of an OLS fit `y = alpha + beta * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub alpha: f64,
    pub beta: f64,
}

/// Closed-form simple regression. Returns `None` when `x` has no variance
/// or fewer than two points are supplied.
pub fn ols(y: &[f64], x: &[f64]) -> Option<LinearFit> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
    }
    if var_x.abs() < 1e-12 {
        return None;
    }
    let beta = cov / var_x;
    Some(LinearFit {
        alpha: mean_y - beta * mean_x,
        beta,
    })
}

/// Mean and sample (n-1) standard deviation.
pub fn mean_std(window: &[f64]) -> Option<(f64, f64)> {
    if window.len() < 2 {
        return None;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1.0);
    Some((mean, var.max(0.0).sqrt()))
}

/// Trailing mean/std over `window` bars. The first `window - 1` entries are
/// `None`.
pub fn rolling_mean_std(values: &[f64], window: usize) -> Vec<Option<(f64, f64)>> {
    if window < 2 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                None
            } else {
                mean_std(&values[i + 1 - window..=i])
            }
        })
        .collect()
}

pub fn is_flat(std: f64) -> bool {
    !std.is_finite() || std < FLAT_EPS
}

/// Result of an augmented Dickey-Fuller regression on residuals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfResult {
    pub statistic: f64,
    pub lags: usize,
    pub nobs: usize,
}

/// ADF without deterministic terms: `de_t = g * e_{t-1} + sum(phi_j * de_{t-j})`,
/// lag order picked by AIC on a common sample, then refit on all usable rows.
///
/// Residuals with no variation yield `statistic = -inf`.
pub fn adf_no_constant(resid: &[f64]) -> Option<AdfResult> {
    let n = resid.len();
    if n < 6 {
        return None;
    }
    let diff: Vec<f64> = resid.windows(2).map(|w| w[1] - w[0]).collect();
    let level_ss: f64 = resid.iter().map(|v| v * v).sum();
    let diff_ss: f64 = diff.iter().map(|v| v * v).sum();
    if level_ss < 1e-18 * n as f64 || diff_ss < 1e-18 * n as f64 {
        return Some(AdfResult {
            statistic: f64::NEG_INFINITY,
            lags: 0,
            nobs: diff.len(),
        });
    }

    let upper = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
    let max_lag = upper.min((n / 2).saturating_sub(1)).min(diff.len().saturating_sub(3));

    let mut best: Option<(usize, f64)> = None;
    for lag in 0..=max_lag {
        let Some(fit) = adf_regression(resid, &diff, lag, max_lag) else {
            continue;
        };
        let m = fit.nobs as f64;
        let aic = m * (fit.ssr / m).ln() + 2.0 * (lag + 1) as f64;
        if best.map(|(_, b)| aic < b).unwrap_or(true) {
            best = Some((lag, aic));
        }
    }
    let (lag, _) = best?;
    let fit = adf_regression(resid, &diff, lag, lag)?;
    Some(AdfResult {
        statistic: fit.t_gamma,
        lags: lag,
        nobs: fit.nobs,
    })
}

struct AdfFit {
    t_gamma: f64,
    ssr: f64,
    nobs: usize,
}

/// Rows start at `skip` so that fits with different `lag` share a sample.
fn adf_regression(level: &[f64], diff: &[f64], lag: usize, skip: usize) -> Option<AdfFit> {
    let k = lag + 1;
    let start = skip.max(lag);
    if diff.len() <= start + k {
        return None;
    }
    let rows = diff.len() - start;
    let x = DMatrix::from_fn(rows, k, |r, c| {
        let t = start + r;
        if c == 0 {
            level[t]
        } else {
            diff[t - c]
        }
    });
    let y = DVector::from_iterator(rows, diff[start..].iter().copied());

    let xtx = x.transpose() * &x;
    let xtx_inv = xtx.try_inverse()?;
    let coef = &xtx_inv * (x.transpose() * &y);
    let resid = &y - &x * &coef;
    let ssr = resid.dot(&resid);
    let dof = rows.saturating_sub(k).max(1) as f64;
    let se = (ssr / dof * xtx_inv[(0, 0)]).sqrt();
    let t_gamma = if se < 1e-300 {
        f64::NEG_INFINITY
    } else {
        coef[0] / se
    };
    Some(AdfFit {
        t_gamma,
        ssr: ssr.max(f64::MIN_POSITIVE),
        nobs: rows,
    })
}

// MacKinnon (2010) response-surface coefficients, two variables, constant.
// cv(T) = b0 + b1 / T + b2 / T^2
const EG_CRIT_2C: [(f64, f64, f64); 3] = [
    (-3.89644, -10.9519, -22.527),
    (-3.33613, -6.1101, -6.823),
    (-3.04445, -4.2412, -2.720),
];

/// 1%, 5% and 10% Engle-Granger critical values for `nobs` observations.
pub fn engle_granger_crits(nobs: usize) -> (f64, f64, f64) {
    let t = nobs.max(1) as f64;
    let cv = |(b0, b1, b2): (f64, f64, f64)| b0 + b1 / t + b2 / (t * t);
    (
        cv(EG_CRIT_2C[0]),
        cv(EG_CRIT_2C[1]),
        cv(EG_CRIT_2C[2]),
    )
}

/// Approximate p-value, interpolated between the critical values.
pub fn engle_granger_p_value(statistic: f64, nobs: usize) -> f64 {
    if statistic.is_nan() {
        return 1.0;
    }
    if statistic == f64::NEG_INFINITY {
        return 0.0;
    }
    let (c1, c5, c10) = engle_granger_crits(nobs);
    let p = if statistic <= c1 {
        0.01 * (statistic - c1).exp()
    } else if statistic <= c5 {
        0.01 + 0.04 * (statistic - c1) / (c5 - c1)
    } else if statistic <= c10 {
        0.05 + 0.05 * (statistic - c5) / (c10 - c5)
    } else {
        0.10 + 0.90 * (1.0 - (-0.5 * (statistic - c10)).exp())
    };
    p.clamp(0.0, 1.0)
}

/// Mean-reversion half-life (bars) from an AR(1) fit on spread levels.
/// Infinite when the spread does not revert.
pub fn half_life(spread: &[f64]) -> f64 {
    if spread.len() < 5 {
        return f64::INFINITY;
    }
    let lagged = &spread[..spread.len() - 1];
    let dy: Vec<f64> = spread.windows(2).map(|w| w[1] - w[0]).collect();
    let Some(fit) = ols(&dy, lagged) else {
        return f64::INFINITY;
    };
    let ar_coef = 1.0 + fit.beta.clamp(-0.999, 0.999);
    if ar_coef <= 0.0 || ar_coef >= 1.0 {
        f64::INFINITY
    } else {
        -(2.0_f64.ln()) / ar_coef.ln()
    }
}
