use anyhow::{anyhow, bail, Result};
use burn::{
    module::Ignored,
    nn::{
        conv::{Conv3d, Conv3dConfig},
        Initializer, PaddingConfig3d,
    },
    prelude::*,
    tensor::{activation, TensorData},
};

use crate::domain::volume::{Vec3, Volume};
use crate::ml::spec::{Init, NetSpec, StageKind, StageSpec, Transfer};

/// Dense sliding-window max with spaced taps
#[derive(Debug, Clone, Copy)]
pub struct MaxFilter {
    pub window:     Vec3,
    pub sparseness: Vec3,
}

impl NetSpec {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNet<B> {
        let stages = self
            .stages
            .iter()
            .map(|s| build_stage(s, device))
            .collect();
        ConvNet {
            stages,
            fov:         Ignored(self.fov()),
            output_maps: self.output_maps,
        }
    }
}

fn build_stage<B: Backend>(spec: &StageSpec, device: &B::Device) -> Stage<B> {
    match spec.kind {
        StageKind::Conv { kernel, init } => {
            let conv = Conv3dConfig::new([spec.in_maps, spec.out_maps], kernel)
                .with_dilation(spec.sparseness)
                .with_padding(PaddingConfig3d::Valid)
                .with_bias(spec.bias)
                .with_initializer(initializer(init))
                .init(device);
            Stage {
                conv:     Some(conv),
                filter:   Ignored(None),
                transfer: Ignored(spec.transfer),
            }
        }
        StageKind::MaxFilter { window } => Stage {
            conv:     None,
            filter:   Ignored(Some(MaxFilter { window, sparseness: spec.sparseness })),
            transfer: Ignored(spec.transfer),
        },
    }
}

fn initializer(init: Init) -> Initializer {
    match init {
        Init::Uniform { min, max } => Initializer::Uniform { min, max },
        Init::Gaussian { mean, std } => Initializer::Normal { mean, std },
        Init::Xavier => Initializer::XavierUniform { gain: 1.0 },
        Init::Constant { value } => Initializer::Constant { value },
    }
}

#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    pub conv:     Option<Conv3d<B>>,
    pub filter:   Ignored<Option<MaxFilter>>,
    pub transfer: Ignored<Transfer>,
}

impl<B: Backend> Stage<B> {
    pub fn forward(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = match (&self.conv, self.filter.0) {
            (Some(conv), _) => conv.forward(x),
            (None, Some(f)) => max_filter(x, f),
            (None, None) => x,
        };
        apply_transfer(x, self.transfer.0)
    }
}

/// out[z,y,x] = max over taps (i,j,k) of in[z + i*sz, y + j*sy, x + k*sx]
fn max_filter<B: Backend>(x: Tensor<B, 5>, f: MaxFilter) -> Tensor<B, 5> {
    let [n, c, d, h, w] = x.dims();
    let out = [
        d - (f.window[0] - 1) * f.sparseness[0],
        h - (f.window[1] - 1) * f.sparseness[1],
        w - (f.window[2] - 1) * f.sparseness[2],
    ];

    let mut acc: Option<Tensor<B, 5>> = None;
    for i in 0..f.window[0] {
        for j in 0..f.window[1] {
            for k in 0..f.window[2] {
                let oz = i * f.sparseness[0];
                let oy = j * f.sparseness[1];
                let ox = k * f.sparseness[2];
                let tap = x.clone().slice([
                    0..n,
                    0..c,
                    oz..oz + out[0],
                    oy..oy + out[1],
                    ox..ox + out[2],
                ]);
                acc = Some(match acc {
                    None => tap,
                    Some(a) => a.max_pair(tap),
                });
            }
        }
    }
    // Windows are never empty, so the loop ran at least once
    acc.unwrap_or(x)
}

fn apply_transfer<B: Backend>(x: Tensor<B, 5>, t: Transfer) -> Tensor<B, 5> {
    match t {
        Transfer::Linear { a, b } if a == 1.0 && b == 0.0 => x,
        Transfer::Linear { a, b } => x.mul_scalar(a).add_scalar(b),
        Transfer::Tanh { a, b } => x.mul_scalar(b).tanh().mul_scalar(a),
        Transfer::Logistic => activation::sigmoid(x),
        Transfer::RectifyLinear => activation::relu(x),
    }
}

#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    pub stages:      Vec<Stage<B>>,
    pub fov:         Ignored<Vec3>,
    pub output_maps: usize,
}

impl<B: Backend> ConvNet<B> {
    /// [1, 1, fov + outsz - 1] → [1, output_maps, outsz]
    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.stages
            .iter()
            .fold(input, |x, stage| stage.forward(x))
    }

    pub fn fov(&self) -> Vec3 {
        self.fov.0
    }
}

// ─── Host ↔ tensor conversion ─────────────────────────────────────────────────

/// A single-channel volume as a [1, 1, z, y, x] tensor
pub fn volume_to_tensor<B: Backend>(vol: &Volume<f32>, device: &B::Device) -> Tensor<B, 5> {
    let [z, y, x] = vol.dims();
    let data = TensorData::new(vol.as_slice().to_vec(), [1, 1, z, y, x]);
    Tensor::from_data(data, device)
}

/// Stack same-sized volumes into a [1, n, z, y, x] tensor
pub fn volumes_to_tensor<B: Backend>(vols: &[Volume<f32>], device: &B::Device) -> Result<Tensor<B, 5>> {
    let Some(first) = vols.first() else { bail!("no volumes to stack") };
    let [z, y, x] = first.dims();
    if vols.iter().any(|v| v.dims() != first.dims()) {
        bail!("cannot stack volumes of different sizes");
    }
    let flat: Vec<f32> = vols.iter().flat_map(|v| v.as_slice().iter().copied()).collect();
    let data = TensorData::new(flat, [1, vols.len(), z, y, x]);
    Ok(Tensor::from_data(data, device))
}

/// Split a [1, n, z, y, x] tensor into n host volumes
pub fn tensor_to_volumes<B: Backend>(t: Tensor<B, 5>) -> Result<Vec<Volume<f32>>> {
    let [batch, maps, z, y, x] = t.dims();
    if batch != 1 {
        bail!("expected a single-sample tensor, got batch of {batch}");
    }
    let flat = t
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("cannot read network output: {e:?}"))?;

    let per_map = z * y * x;
    (0..maps)
        .map(|m| Volume::from_vec([z, y, x], flat[m * per_map..(m + 1) * per_map].to_vec()))
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    const NET: &str = "
        [input]
        type=input
        size=1
        [conv1]
        type=conv
        size=1,3,3
        input=input
        output=nl1
        [nl1]
        type=transfer
        function=rectify_linear
        size=2
        [pool1]
        type=max_filter
        size=1,2,2
        input=nl1
        output=mp1
        [mp1]
        type=sum
        size=2
        [conv2]
        type=conv
        size=2,3,3
        input=mp1
        output=output
        [output]
        type=transfer
        function=logistic
        size=3
    ";

    #[test]
    fn test_forward_shape_matches_fov() {
        let device = Default::default();
        let spec = NetSpec::parse(NET).unwrap();
        let net: ConvNet<TestBackend> = spec.init(&device);

        let insz = spec.input_size([1, 4, 5]);
        let input = Tensor::<TestBackend, 5>::zeros([1, 1, insz[0], insz[1], insz[2]], &device);
        let out = net.forward(input);
        assert_eq!(out.dims(), [1, 3, 1, 4, 5]);
    }

    #[test]
    fn test_logistic_output_is_a_probability() {
        let device = Default::default();
        let spec = NetSpec::parse(NET).unwrap();
        let net: ConvNet<TestBackend> = spec.init(&device);

        let insz = spec.input_size([1, 2, 2]);
        let input = Tensor::<TestBackend, 5>::ones([1, 1, insz[0], insz[1], insz[2]], &device);
        let values = net.forward(input).into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|&p| p > 0.0 && p < 1.0));
    }

    #[test]
    fn test_max_filter_dense_and_sparse() {
        let device = Default::default();
        // x: 0 1 2 3 4
        let data = TensorData::new(vec![0.0f32, 1.0, 2.0, 3.0, 4.0], [1, 1, 1, 1, 5]);
        let x = Tensor::<TestBackend, 5>::from_data(data, &device);

        let dense = max_filter(x.clone(), MaxFilter { window: [1, 1, 2], sparseness: [1, 1, 1] });
        assert_eq!(dense.into_data().to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        let sparse = max_filter(x, MaxFilter { window: [1, 1, 2], sparseness: [1, 1, 2] });
        assert_eq!(sparse.into_data().to_vec::<f32>().unwrap(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_volume_tensor_round_trip_keeps_layout() {
        let device = Default::default();
        let a = Volume::from_vec([1, 2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let b = a.map(|v| -v);
        let t = volumes_to_tensor::<TestBackend>(&[a.clone(), b.clone()], &device).unwrap();
        assert_eq!(t.dims(), [1, 2, 1, 2, 2]);
        let back = tensor_to_volumes(t).unwrap();
        assert_eq!(back, vec![a, b]);
    }

    #[test]
    fn test_scaled_tanh() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 5>::zeros([1, 1, 1, 1, 1], &device).add_scalar(100.0);
        let y = apply_transfer(x, Transfer::Tanh { a: 1.7159, b: 0.6666 });
        let v = y.into_data().to_vec::<f32>().unwrap()[0];
        assert!((v - 1.7159).abs() < 1e-4);
    }
}
