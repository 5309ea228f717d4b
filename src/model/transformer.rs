use super::init::DeterministicRng;

const ROPE_THETA: f32 = 1000.0;

#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Vec<f32>, // out_dim x in_dim, row-major
    pub bias: Option<Vec<f32>>,
    pub in_dim: usize,
    pub out_dim: usize,
}

impl Linear {
    pub fn random(rng: &mut DeterministicRng, in_dim: usize, out_dim: usize, with_bias: bool) -> Self {
        let scale = 1.0 / (in_dim as f32).sqrt();
        Self {
            weight: rng.vec(in_dim * out_dim, scale),
            bias: with_bias.then(|| rng.vec(out_dim, scale)),
            in_dim,
            out_dim,
        }
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        debug_assert_eq!(x.len(), self.in_dim);
        let mut out = vec![0.0f32; self.out_dim];
        for (o, slot) in out.iter_mut().enumerate() {
            let row = &self.weight[o * self.in_dim..(o + 1) * self.in_dim];
            let mut acc = 0.0f32;
            for i in 0..self.in_dim {
                acc += row[i] * x[i];
            }
            if let Some(b) = &self.bias {
                acc += b[o];
            }
            *slot = acc;
        }
        out
    }

    pub fn forward_seq(&self, xs: &[Vec<f32>]) -> Vec<Vec<f32>> {
        xs.iter().map(|x| self.forward(x)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub weight: Vec<f32>,
    pub bias: Vec<f32>,
    pub eps: f32,
}

impl LayerNorm {
    pub fn new(dim: usize, eps: f32) -> Self {
        Self { weight: vec![1.0; dim], bias: vec![0.0; dim], eps }
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let n = x.len() as f32;
        let mean = x.iter().sum::<f32>() / n;
        let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        let denom = (var + self.eps).sqrt();
        x.iter()
            .enumerate()
            .map(|(i, v)| ((v - mean) / denom) * self.weight[i] + self.bias[i])
            .collect()
    }
}

fn add(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

/// Precomputes `(cos, sin)` tables for `seq_len` positions over `rotary_dim/2`
/// frequency pairs, base theta = 1000.0 (GPT-NeoX style).
pub fn precompute_rope(seq_len: usize, rotary_dim: usize) -> Vec<Vec<(f32, f32)>> {
    let half = rotary_dim / 2;
    let freqs: Vec<f32> = (0..half).map(|i| 1.0 / ROPE_THETA.powf((2 * i) as f32 / rotary_dim as f32)).collect();
    (0..seq_len)
        .map(|pos| freqs.iter().map(|f| { let angle = pos as f32 * f; (angle.cos(), angle.sin()) }).collect())
        .collect()
}

/// Applies the GPT-NeoX rotary split: pairs `x[i]` with `x[i + rotary_dim/2]`
/// for `i` in `0..rotary_dim/2`; dimensions beyond `rotary_dim` pass through.
pub fn apply_rotary(x: &[f32], table: &[(f32, f32)]) -> Vec<f32> {
    let rotary_dim = table.len() * 2;
    let half = table.len();
    let mut out = x.to_vec();
    for i in 0..half {
        let (cos, sin) = table[i];
        let x1 = x[i];
        let x2 = x[i + half];
        out[i] = x1 * cos - x2 * sin;
        out[i + half] = x2 * cos + x1 * sin;
    }
    for v in out.iter_mut().take(x.len()).skip(rotary_dim) {
        // pass-through dims already copied via to_vec()
        let _ = v;
    }
    out
}

#[derive(Debug, Clone)]
pub struct Attention {
    pub num_heads: usize,
    pub head_dim: usize,
    pub wq: Linear,
    pub wk: Linear,
    pub wv: Linear,
    pub wo: Linear,
    pub causal: bool,
}

impl Attention {
    pub fn random(rng: &mut DeterministicRng, hidden: usize, num_heads: usize, causal: bool) -> Self {
        let head_dim = hidden / num_heads;
        Self {
            num_heads,
            head_dim,
            wq: Linear::random(rng, hidden, hidden, false),
            wk: Linear::random(rng, hidden, hidden, false),
            wv: Linear::random(rng, hidden, hidden, false),
            wo: Linear::random(rng, hidden, hidden, false),
            causal,
        }
    }

    /// Runs self-attention over a full sequence. `rope` supplies per-position
    /// rotary tables applied to Q and K before the dot product. `key_mask`
    /// marks which positions are real tokens (as opposed to padding) and is
    /// excluded from every query's attention distribution.
    pub fn forward(&self, xs: &[Vec<f32>], rope: &[Vec<(f32, f32)>], key_mask: &[bool]) -> Vec<Vec<f32>> {
        let seq_len = xs.len();
        let q = self.wq.forward_seq(xs);
        let k = self.wk.forward_seq(xs);
        let v = self.wv.forward_seq(xs);

        let mut out = vec![vec![0.0f32; self.num_heads * self.head_dim]; seq_len];

        for h in 0..self.num_heads {
            let range = h * self.head_dim..(h + 1) * self.head_dim;
            let q_h: Vec<Vec<f32>> = (0..seq_len).map(|t| apply_rotary(&q[t][range.clone()], &rope[t])).collect();
            let k_h: Vec<Vec<f32>> = (0..seq_len).map(|t| apply_rotary(&k[t][range.clone()], &rope[t])).collect();
            let v_h: Vec<&[f32]> = (0..seq_len).map(|t| &v[t][range.clone()]).collect();

            let scale = 1.0 / (self.head_dim as f32).sqrt();
            for t in 0..seq_len {
                let limit = if self.causal { t + 1 } else { seq_len };
                let mut scores = vec![f32::NEG_INFINITY; seq_len];
                for (s, score) in scores.iter_mut().enumerate().take(limit) {
                    if !key_mask[s] {
                        continue;
                    }
                    let dot: f32 = q_h[t].iter().zip(&k_h[s]).map(|(a, b)| a * b).sum();
                    *score = dot * scale;
                }
                let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = scores.iter().map(|s| if s.is_finite() { (s - max).exp() } else { 0.0 }).collect();
                let sum: f32 = exps.iter().sum::<f32>().max(1e-12);
                let weights: Vec<f32> = exps.iter().map(|e| e / sum).collect();

                let mut ctx = vec![0.0f32; self.head_dim];
                for (s, w) in weights.iter().enumerate() {
                    for d in 0..self.head_dim {
                        ctx[d] += w * v_h[s][d];
                    }
                }
                out[t][range.clone()].copy_from_slice(&ctx);
            }
        }

        self.wo.forward_seq(&out)
    }
}

/// `fc2(fc11(x) * silu(fc12(x)))`, no biases anywhere.
#[derive(Debug, Clone)]
pub struct SwiGlu {
    pub fc11: Linear,
    pub fc12: Linear,
    pub fc2: Linear,
}

impl SwiGlu {
    pub fn random(rng: &mut DeterministicRng, hidden: usize, intermediate: usize) -> Self {
        Self {
            fc11: Linear::random(rng, hidden, intermediate, false),
            fc12: Linear::random(rng, hidden, intermediate, false),
            fc2: Linear::random(rng, intermediate, hidden, false),
        }
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let a = self.fc11.forward(x);
        let b = self.fc12.forward(x);
        let gated: Vec<f32> = a.iter().zip(&b).map(|(a, b)| a * silu(*b)).collect();
        self.fc2.forward(&gated)
    }
}

/// One transformer layer with post-layer-norm: `norm(residual + sublayer(x))`
/// applied after both attention and the feed-forward block.
#[derive(Debug, Clone)]
pub struct EncoderLayer {
    pub attn: Attention,
    pub attn_norm: LayerNorm,
    pub ffn: SwiGlu,
    pub ffn_norm: LayerNorm,
}

impl EncoderLayer {
    pub fn random(rng: &mut DeterministicRng, hidden: usize, num_heads: usize, intermediate: usize, causal: bool) -> Self {
        Self {
            attn: Attention::random(rng, hidden, num_heads, causal),
            attn_norm: LayerNorm::new(hidden, 1e-12),
            ffn: SwiGlu::random(rng, hidden, intermediate),
            ffn_norm: LayerNorm::new(hidden, 1e-12),
        }
    }

    pub fn forward(&self, xs: &[Vec<f32>], rope: &[Vec<(f32, f32)>], key_mask: &[bool]) -> Vec<Vec<f32>> {
        let attn_out = self.attn.forward(xs, rope, key_mask);
        let post_attn: Vec<Vec<f32>> = xs.iter().zip(&attn_out).map(|(x, a)| self.attn_norm.forward(&add(x, a))).collect();

        post_attn
            .iter()
            .map(|x| {
                let ffn_out = self.ffn.forward(x);
                self.ffn_norm.forward(&add(x, &ffn_out))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rope_identity_at_position_zero() {
        let table = precompute_rope(1, 4);
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let rotated = apply_rotary(&x, &table[0]);
        assert!((rotated[0] - x[0]).abs() < 1e-5);
        assert!((rotated[2] - x[2]).abs() < 1e-5);
    }

    #[test]
    fn layer_norm_output_has_zero_mean_unit_variance() {
        let ln = LayerNorm::new(4, 1e-12);
        let out = ln.forward(&[1.0, 2.0, 3.0, 4.0]);
        let mean: f32 = out.iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-4);
    }

    #[test]
    fn causal_attention_does_not_attend_to_future_positions() {
        let mut rng = DeterministicRng::new(42);
        let attn = Attention::random(&mut rng, 8, 2, true);
        let rope = precompute_rope(3, 4);
        let xs = vec![vec![1.0; 8], vec![2.0; 8], vec![3.0; 8]];
        let mask = vec![true; 3];
        let out_full = attn.forward(&xs, &rope, &mask);

        let xs_truncated = vec![xs[0].clone(), xs[1].clone()];
        let rope_truncated = vec![rope[0].clone(), rope[1].clone()];
        let mask_truncated = vec![true; 2];
        let out_truncated = attn.forward(&xs_truncated, &rope_truncated, &mask_truncated);

        for i in 0..8 {
            assert!((out_full[0][i] - out_truncated[0][i]).abs() < 1e-4);
        }
    }
}
