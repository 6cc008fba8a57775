use burn::{
    nn::{
        attention::{MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
        PositionalEncoding, PositionalEncodingConfig,
    },
    prelude::*,
    tensor::activation::{gelu, sigmoid},
};

use crate::domain::sample::PROJECTION_CHANNELS;

/// Longest window the positional encoding covers unless told otherwise.
pub const DEFAULT_MAX_SEQ_LEN: usize = 5_000;

/// Everything a pattern model predicts for one batch.
#[derive(Debug, Clone)]
pub struct ModelOutput<B: Backend> {
    /// [batch, num_patterns]
    pub pattern_logits: Tensor<B, 2>,
    /// [batch, 3, future_steps]
    pub projection:     Tensor<B, 3>,
    /// [batch], already squashed into (0, 1)
    pub confidence:     Tensor<B, 1>,
    /// [batch, context_dim]
    pub context:        Tensor<B, 2>,
}

/// The only thing the trainer needs from a model: one forward pass from a
/// `[batch, seq_len, feature_dim]` window to a [`ModelOutput`].
pub trait PatternModel<B: Backend> {
    fn forward(&self, inputs: Tensor<B, 3>) -> ModelOutput<B>;
}

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally. Adding them again gives conflicting impls.
#[derive(Config, Debug)]
pub struct PatternFinderXlConfig {
    pub feature_dim:  usize,
    pub d_model:      usize,
    pub nhead:        usize,
    pub num_layers:   usize,
    pub num_patterns: usize,
    pub context_dim:  usize,
    pub future_steps: usize,
    #[config(default = 0.1)]
    pub dropout:      f64,
    /// Rows of precomputed sinusoids; windows longer than this cannot be encoded
    #[config(default = "DEFAULT_MAX_SEQ_LEN")]
    pub max_seq_len:  usize,
}

impl PatternFinderXlConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PatternFinderXl<B> {
        let input_proj = LinearConfig::new(self.feature_dim, self.d_model).init(device);
        let positional = PositionalEncodingConfig::new(self.d_model)
            .with_max_sequence_size(self.max_seq_len)
            .init(device);
        let layers: Vec<EncoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_encoder_block(device))
            .collect();
        let final_norm      = LayerNormConfig::new(self.d_model).init(device);
        let pattern_head    = LinearConfig::new(self.d_model, self.num_patterns).init(device);
        let projection_head = LinearConfig::new(self.d_model, PROJECTION_CHANNELS * self.future_steps).init(device);
        let confidence_head = LinearConfig::new(self.d_model, 1).init(device);
        let context_head    = LinearConfig::new(self.d_model, self.context_dim).init(device);
        let dropout         = DropoutConfig::new(self.dropout).init();
        PatternFinderXl {
            input_proj, positional, layers, final_norm,
            pattern_head, projection_head, confidence_head, context_head,
            dropout,
            future_steps: self.future_steps,
        }
    }

    fn build_encoder_block<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        let d_ff = 4 * self.d_model;
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.nhead)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        EncoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        use burn::nn::attention::MhaInput;
        let attn_output = self.self_attn.forward(MhaInput::self_attn(x.clone())).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(gelu(self.ffn_linear1.forward(x.clone())));
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

/// Transformer encoder over market windows with four prediction heads.
#[derive(Module, Debug)]
pub struct PatternFinderXl<B: Backend> {
    pub input_proj:      Linear<B>,
    pub positional:      PositionalEncoding<B>,
    pub layers:          Vec<EncoderBlock<B>>,
    pub final_norm:      LayerNorm<B>,
    pub pattern_head:    Linear<B>,
    pub projection_head: Linear<B>,
    pub confidence_head: Linear<B>,
    pub context_head:    Linear<B>,
    pub dropout:         Dropout,
    pub future_steps:    usize,
}

impl<B: Backend> PatternModel<B> for PatternFinderXl<B> {
    /// inputs: [batch, seq_len, feature_dim]
    fn forward(&self, inputs: Tensor<B, 3>) -> ModelOutput<B> {
        let [batch_size, _, _] = inputs.dims();

        // Lift raw features to d_model, then inject position explicitly:
        // self-attention alone is permutation-invariant.
        let x = self.positional.forward(self.input_proj.forward(inputs));
        let mut x = self.dropout.forward(x);
        for layer in &self.layers {
            x = layer.forward(x);
        }
        let x = self.final_norm.forward(x); // [batch, seq_len, d_model]
        let [_, _, d_model] = x.dims();

        // Mean-pool over time into one summary vector per window.
        let pooled = x.mean_dim(1).reshape([batch_size, d_model]);

        let pattern_logits = self.pattern_head.forward(pooled.clone());
        let projection = self
            .projection_head
            .forward(pooled.clone())
            .reshape([batch_size, PROJECTION_CHANNELS, self.future_steps]);
        let confidence = sigmoid(self.confidence_head.forward(pooled.clone())).reshape([batch_size]);
        let context = self.context_head.forward(pooled);

        ModelOutput { pattern_logits, projection, confidence, context }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_contract_shapes() {
        let device = Default::default();
        let model = PatternFinderXlConfig::new(3, 16, 2, 1, 5, 4, 6).init::<TestBackend>(&device);
        let inputs = Tensor::<TestBackend, 3>::ones([2, 7, 3], &device);

        let out = model.forward(inputs);
        assert_eq!(out.pattern_logits.dims(), [2, 5]);
        assert_eq!(out.projection.dims(), [2, PROJECTION_CHANNELS, 6]);
        assert_eq!(out.confidence.dims(), [2]);
        assert_eq!(out.context.dims(), [2, 4]);

        let conf: Vec<f32> = out.confidence.into_data().to_vec().unwrap();
        assert!(conf.iter().all(|c| *c > 0.0 && *c < 1.0));
    }

    #[test]
    fn test_positional_encoding_covers_windows_past_the_default_length() {
        let device = Default::default();
        let seq_len = DEFAULT_MAX_SEQ_LEN + 1;
        let model = PatternFinderXlConfig::new(2, 8, 2, 1, 3, 1, 2)
            .with_max_seq_len(seq_len)
            .init::<TestBackend>(&device);
        assert_eq!(model.positional.max_sequence_size, seq_len);
        assert_eq!(model.positional.sinusoids.dims(), [1, seq_len, 8]);

        let out = model.forward(Tensor::<TestBackend, 3>::zeros([1, 5, 2], &device));
        assert_eq!(out.pattern_logits.dims(), [1, 3]);
    }
}
