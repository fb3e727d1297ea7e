use burn::module::{Module, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig};
use burn::nn::{Linear, LinearConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

const BLOCKS: usize = 6;

/// Shape parameters of the convolutional embedding network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cnn14Config {
    pub(crate) mel_bins: usize,
    /// Channels of the first block; each later block doubles them.
    pub(crate) base_channels: usize,
}

impl Cnn14Config {
    pub(crate) const fn new(mel_bins: usize, base_channels: usize) -> Self {
        Self {
            mel_bins,
            base_channels,
        }
    }

    /// Width of the embedding produced by this configuration.
    pub(crate) const fn embedding_dim(&self) -> usize {
        self.base_channels << (BLOCKS - 1)
    }

    pub(crate) fn init<B: Backend>(&self, device: &B::Device) -> Cnn14<B> {
        let mut blocks = Vec::with_capacity(BLOCKS);
        let mut in_channels = 1;
        for idx in 0..BLOCKS {
            let out_channels = self.base_channels << idx;
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }
        let dim = self.embedding_dim();
        Cnn14 {
            mel_scale: Param::from_tensor(Tensor::ones([self.mel_bins], device)),
            mel_shift: Param::from_tensor(Tensor::zeros([self.mel_bins], device)),
            blocks,
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(dim, dim).init(device),
        }
    }
}

/// Two 3x3 convolutions with ReLU; batch norm is folded into the conv weights.
#[derive(Module, Debug)]
pub(crate) struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = |input: usize| {
            Conv2dConfig::new([input, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .with_bias(true)
                .init(device)
        };
        Self {
            conv1: conv(in_channels),
            conv2: conv(out_channels),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv1.forward(x));
        relu(self.conv2.forward(x))
    }
}

/// CNN14-style audio embedding network.
///
/// Input is a log-mel spectrogram `[batch, 1, frames, mel_bins]`; output is
/// `[batch, embedding_dim]`. Frames may vary between calls.
#[derive(Module, Debug)]
pub(crate) struct Cnn14<B: Backend> {
    /// Per-mel-bin affine (frozen input batch norm).
    mel_scale: Param<Tensor<B, 1>>,
    mel_shift: Param<Tensor<B, 1>>,
    blocks: Vec<ConvBlock<B>>,
    pool: AvgPool2d,
    fc1: Linear<B>,
}

impl<B: Backend> Cnn14<B> {
    pub(crate) fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mel_bins = self.mel_scale.dims()[0];
        let scale = self.mel_scale.val().reshape([1, 1, 1, mel_bins]);
        let shift = self.mel_shift.val().reshape([1, 1, 1, mel_bins]);
        let mut x = x * scale + shift;

        let last = self.blocks.len().saturating_sub(1);
        for (idx, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if idx < last {
                x = self.pool.forward(x);
            }
        }

        // Mean over frequency, then max + mean over time.
        let [batch, channels, frames, _] = x.dims();
        let x = x.mean_dim(3).reshape([batch, channels, frames]);
        let pooled = x.clone().max_dim(2) + x.mean_dim(2);
        let pooled = pooled.reshape([batch, channels]);
        relu(self.fc1.forward(pooled))
    }
}
