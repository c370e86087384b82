use burn::tensor::{Tensor, backend::Backend, module::conv2d, ops::ConvOptions};

/// Default side of the gaussian window.
pub const SSIM_WINDOW_SIZE: usize = 11;

const SIGMA: f32 = 1.5;
const K1: f32 = 0.01;
const K2: f32 = 0.03;

pub(crate) struct Ssim<B: Backend> {
    weights_1d_v: Tensor<B, 4>,
    c1: f32,
    c2: f32,
}

fn gaussian<B: Backend>(window_size: usize, sigma: f32, device: &B::Device) -> Tensor<B, 1> {
    let window_extent = (window_size / 2) as f32;
    let vals: Vec<_> = (0..window_size)
        .map(|x| f32::exp(-(x as f32 - window_extent).powf(2.0) / (2.0 * sigma.powf(2.0))))
        .collect();
    let gauss = Tensor::from_floats(vals.as_slice(), device);
    gauss.clone() / gauss.sum()
}

/// Largest odd window not bigger than the default or the image.
pub(crate) fn window_for(height: usize, width: usize) -> usize {
    let side = SSIM_WINDOW_SIZE.min(height).min(width).max(1);
    if side % 2 == 0 { side - 1 } else { side }
}

impl<B: Backend> Ssim<B> {
    /// `data_range` is the declared distance between the smallest and largest possible pixel
    /// value. It is never inferred from the images so scores stay comparable across examples.
    pub fn new(window_size: usize, channels: usize, data_range: f32, device: &B::Device) -> Self {
        // Channels out, in, h, w.
        let weights_1d_v = gaussian(window_size, SIGMA, device)
            .reshape([window_size, 1])
            .unsqueeze::<4>()
            .repeat_dim(0, channels);
        Self {
            weights_1d_v,
            c1: (K1 * data_range).powf(2.0),
            c2: (K2 * data_range).powf(2.0),
        }
    }

    // Separable blur without padding, the border where the window does not fit is dropped.
    fn gaussian_blur(&self, img: Tensor<B, 4>) -> Tensor<B, 4> {
        let [channels, _, window_size, _] = self.weights_1d_v.dims();

        let conv_options = ConvOptions::new([1, 1], [0, 0], [1, 1], channels);
        let kernel_v = self.weights_1d_v.clone();
        let kernel_h = self
            .weights_1d_v
            .clone()
            .reshape([channels, 1, 1, window_size]);

        let v_blur = conv2d(img, kernel_v, None, conv_options.clone());
        conv2d(v_blur, kernel_h, None, conv_options)
    }

    /// Per pixel SSIM of two `[H, W, C]` images, returned as `[H', W', C]`.
    pub fn ssim(&self, img1: Tensor<B, 3>, img2: Tensor<B, 3>) -> Tensor<B, 3> {
        // Images are [H, W, C], need them as [N, C, H, W].
        let img1 = img1.permute([2, 0, 1]).unsqueeze::<4>();
        let img2 = img2.permute([2, 0, 1]).unsqueeze::<4>();

        let mu_x = self.gaussian_blur(img1.clone());
        let mu_y = self.gaussian_blur(img2.clone());
        let mu_xx = mu_x.clone() * mu_x.clone();
        let mu_yy = mu_y.clone() * mu_y.clone();
        let mu_xy = mu_x * mu_y;

        let sigma_xx = self.gaussian_blur(img1.clone() * img1.clone()) - mu_xx.clone();
        let sigma_yy = self.gaussian_blur(img2.clone() * img2.clone()) - mu_yy.clone();
        let sigma_xy = self.gaussian_blur(img1 * img2) - mu_xy.clone();

        let ssim = ((mu_xy * 2.0 + self.c1) * (sigma_xy * 2.0 + self.c2))
            / ((mu_xx + mu_yy + self.c1) * (sigma_xx + sigma_yy + self.c2));

        let ssim = ssim.squeeze::<3>(0);
        ssim.permute([1, 2, 0])
    }
}
