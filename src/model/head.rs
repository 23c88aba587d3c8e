//! Classifier head trained on cached extractor features
//!
//! `flatten -> dropout -> dense(relu) -> dropout -> dense(1)`. The final
//! sigmoid is applied in [`ClassifierHead::forward_probability`]; training
//! works on logits so the loss can use the numerically stable form.

use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig, Relu},
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};

/// Architecture of the head; shared by the trainer and the predictor
#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    /// Per-sample feature map shape `[C, H, W]`
    pub input_shape: [usize; 3],

    #[config(default = "128")]
    pub hidden_units: usize,

    /// Drop probability for both dropout layers
    #[config(default = "0.7")]
    pub dropout: f64,
}

impl ClassifierHeadConfig {
    pub fn input_features(&self) -> usize {
        self.input_shape.iter().product()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        let glorot = Initializer::XavierUniform { gain: 1.0 };

        ClassifierHead {
            input_dropout: DropoutConfig::new(self.dropout).init(),
            hidden: LinearConfig::new(self.input_features(), self.hidden_units)
                .with_initializer(glorot.clone())
                .init(device),
            relu: Relu::new(),
            hidden_dropout: DropoutConfig::new(self.dropout).init(),
            output: LinearConfig::new(self.hidden_units, 1)
                .with_initializer(glorot)
                .init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    input_dropout: Dropout,
    hidden: Linear<B>,
    relu: Relu,
    hidden_dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// Logits of the pneumonia class, `[batch, C, H, W] -> [batch]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 1> {
        let [batch, _, _, _] = features.dims();

        let x: Tensor<B, 2> = features.flatten(1, 3);
        let x = self.input_dropout.forward(x);
        let x = self.relu.forward(self.hidden.forward(x));
        let x = self.hidden_dropout.forward(x);
        let x = self.output.forward(x);

        x.reshape([batch])
    }

    /// Pneumonia probability in `[0, 1]`
    pub fn forward_probability(&self, features: Tensor<B, 4>) -> Tensor<B, 1> {
        sigmoid(self.forward(features))
    }
}
