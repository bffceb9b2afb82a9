// ============================================================
// Layer 5 — Cost Functions
// ============================================================
// Runs on the host after each forward pass. Given the network's
// output maps (props) and the target maps (labels) it returns:
//
//   err   — summed cost over every voxel of every map
//   cls   — number of voxels whose thresholded prediction
//           (prop > 0.5) disagrees with the label (label > 0.5)
//   grads — (prop - label) for every cost, one map per output,
//           handed to Network::backward
//
// The backward pass applies the grads G at the network output
// through sum(output ⊙ G), so the derivative of the output
// non-linearity still enters the chain on top of G.
//
// Reference: Bishop (2006) §4.3, §5.2

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::volume::Volume;

/// Probabilities are clamped into [EPS, 1 - EPS] before taking logs
const EPS: f32 = 1e-7;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostFn {
    /// Σ (p - l)²
    Square,
    /// Σ -l·ln p - (1 - l)·ln(1 - p)
    Binomial,
    /// Σ -l·ln p  (use with --softmax)
    Multinomial,
}

#[derive(Debug, Clone)]
pub struct CostOutput {
    pub err:   f64,
    pub cls:   f64,
    pub grads: Vec<Volume<f32>>,
}

impl CostFn {
    pub fn evaluate(self, props: &[Volume<f32>], labels: &[Volume<f32>]) -> Result<CostOutput> {
        check_shapes(props, labels)?;

        let mut err = 0.0f64;
        let mut cls = 0.0f64;
        let mut grads = Vec::with_capacity(props.len());

        for (p, l) in props.iter().zip(labels) {
            let mut g = Volume::new(p.dims(), 0.0f32);
            for ((&pv, &lv), gv) in p
                .as_slice()
                .iter()
                .zip(l.as_slice())
                .zip(g.as_mut_slice())
            {
                *gv = pv - lv;
                err += match self {
                    CostFn::Square => ((pv - lv) * (pv - lv)) as f64,
                    CostFn::Binomial => {
                        let q = pv.clamp(EPS, 1.0 - EPS);
                        -(lv * q.ln() + (1.0 - lv) * (1.0 - q).ln()) as f64
                    }
                    CostFn::Multinomial => {
                        let q = pv.clamp(EPS, 1.0 - EPS);
                        -(lv * q.ln()) as f64
                    }
                };
                if (pv > 0.5) != (lv > 0.5) {
                    cls += 1.0;
                }
            }
            grads.push(g);
        }

        Ok(CostOutput { err, cls, grads })
    }
}

fn check_shapes(props: &[Volume<f32>], labels: &[Volume<f32>]) -> Result<()> {
    if props.len() != labels.len() {
        bail!(
            "network produced {} maps but there are {} label maps",
            props.len(),
            labels.len()
        );
    }
    for (i, (p, l)) in props.iter().zip(labels).enumerate() {
        if p.dims() != l.dims() {
            bail!("map {}: prediction {:?} vs label {:?}", i, p.dims(), l.dims());
        }
    }
    Ok(())
}

/// Voxel-wise softmax across maps
pub fn softmax(props: &[Volume<f32>]) -> Vec<Volume<f32>> {
    let Some(first) = props.first() else { return Vec::new() };
    let mut out: Vec<Volume<f32>> = props.to_vec();

    for i in 0..first.len() {
        let max = props
            .iter()
            .map(|p| p.as_slice()[i])
            .fold(f32::NEG_INFINITY, f32::max);
        let mut total = 0.0f32;
        for o in out.iter_mut() {
            let e = (o.as_slice()[i] - max).exp();
            o.as_mut_slice()[i] = e;
            total += e;
        }
        for o in out.iter_mut() {
            o.as_mut_slice()[i] /= total;
        }
    }

    out
}

/// Re-weight gradients so positive and negative voxels of each
/// map contribute equally: positives get total / (2·n_pos),
/// negatives total / (2·n_neg). Maps that are all one class are
/// left untouched.
pub fn rebalance(grads: &[Volume<f32>], labels: &[Volume<f32>]) -> Result<Vec<Volume<f32>>> {
    check_shapes(grads, labels)?;

    Ok(grads
        .iter()
        .zip(labels)
        .map(|(g, l)| {
            let total = l.len() as f32;
            let n_pos = l.as_slice().iter().filter(|&&v| v > 0.5).count() as f32;
            let n_neg = total - n_pos;
            if n_pos == 0.0 || n_neg == 0.0 {
                return g.clone();
            }
            let w_pos = total / (2.0 * n_pos);
            let w_neg = total / (2.0 * n_neg);

            let mut out = g.clone();
            for (o, &lv) in out.as_mut_slice().iter_mut().zip(l.as_slice()) {
                *o *= if lv > 0.5 { w_pos } else { w_neg };
            }
            out
        })
        .collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn vol(values: &[f32]) -> Volume<f32> {
        Volume::from_vec([1, 1, values.len()], values.to_vec()).unwrap()
    }

    #[test]
    fn test_square_loss() {
        let out = CostFn::Square
            .evaluate(&[vol(&[0.2, 0.9])], &[vol(&[0.0, 1.0])])
            .unwrap();
        assert!((out.err - 0.05).abs() < 1e-6);
        assert_eq!(out.cls, 0.0);
        assert!((out.grads[0].get(0, 0, 0) - 0.2).abs() < 1e-6);
        assert!((out.grads[0].get(0, 0, 1) + 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_binomial_counts_misclassified_voxels() {
        let out = CostFn::Binomial
            .evaluate(&[vol(&[0.8, 0.3, 0.6])], &[vol(&[0.0, 0.0, 1.0])])
            .unwrap();
        assert_eq!(out.cls, 1.0);
        let expected = -(0.2f64).ln() - (0.7f64).ln() - (0.6f64).ln();
        assert!((out.err - expected).abs() < 1e-4);
    }

    #[test]
    fn test_binomial_survives_saturated_outputs() {
        let out = CostFn::Binomial
            .evaluate(&[vol(&[0.0, 1.0])], &[vol(&[1.0, 0.0])])
            .unwrap();
        assert!(out.err.is_finite());
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(CostFn::Square.evaluate(&[vol(&[0.0])], &[vol(&[0.0, 1.0])]).is_err());
        assert!(CostFn::Square.evaluate(&[vol(&[0.0])], &[]).is_err());
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let out = softmax(&[vol(&[1.0, -2.0]), vol(&[3.0, 0.5])]);
        for i in 0..2 {
            let s = out[0].as_slice()[i] + out[1].as_slice()[i];
            assert!((s - 1.0).abs() < 1e-6);
        }
        assert!(out[1].as_slice()[0] > out[0].as_slice()[0]);
    }

    #[test]
    fn test_rebalance_equalises_classes() {
        // One positive, three negatives, unit gradients
        let grads = [vol(&[1.0, 1.0, 1.0, 1.0])];
        let labels = [vol(&[1.0, 0.0, 0.0, 0.0])];
        let out = rebalance(&grads, &labels).unwrap();
        let g = out[0].as_slice();
        assert!((g[0] - 2.0).abs() < 1e-6);
        assert!((g[1] - 4.0 / 6.0).abs() < 1e-6);
        // Total weight of each class is now equal
        assert!((g[0] - (g[1] + g[2] + g[3])).abs() < 1e-5);
    }

    #[test]
    fn test_rebalance_single_class_untouched() {
        let grads = [vol(&[0.5, -0.5])];
        let labels = [vol(&[1.0, 1.0])];
        let out = rebalance(&grads, &labels).unwrap();
        assert_eq!(out[0], grads[0]);
    }
}
