//! libtorch-backed networks via tch-rs.
//!
//! Same architecture as [`Mlp`](super::Mlp), `input → hidden… → output` with
//! ReLU activations, but evaluated by libtorch. This module is only
//! available with the `libtorch` feature.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2};
use tch::nn::{self, Module, OptimizerConfig};
use tch::{Device, Kind, Reduction, Tensor};

use super::{Model, ModelError, NetworkSpec, OutputActivation};

/// MLP stored in a libtorch variable store.
pub struct TorchModel {
    spec: NetworkSpec,
    vs: nn::VarStore,
    net: nn::Sequential,
    opt: nn::Optimizer,
    device: Device,
}

impl TorchModel {
    fn build(spec: &NetworkSpec, device: Device) -> Result<Self, ModelError> {
        let vs = nn::VarStore::new(device);
        let net = {
            let p = &vs.root();
            let init = nn::LinearConfig {
                ws_init: nn::Init::Randn {
                    mean: 0.0,
                    stdev: 0.05,
                },
                bs_init: Some(nn::Init::Const(0.0)),
                bias: true,
            };
            let sizes = spec.layer_sizes();
            let n_layers = sizes.len() - 1;
            let mut seq = nn::seq();
            for (i, w) in sizes.windows(2).enumerate() {
                seq = seq.add(nn::linear(
                    p / format!("l{}", i + 1),
                    w[0] as i64,
                    w[1] as i64,
                    init,
                ));
                if i + 1 < n_layers {
                    seq = seq.add_fn(|x| x.relu());
                }
            }
            if spec.output_activation == OutputActivation::Tanh {
                seq = seq.add_fn(|x| x.tanh());
            }
            seq
        };
        let opt = nn::Adam::default().build(&vs, spec.learning_rate)?;
        Ok(Self {
            spec: spec.clone(),
            vs,
            net,
            opt,
            device,
        })
    }

    fn to_tensor(&self, batch: ArrayView2<f64>) -> Tensor {
        let (rows, cols) = batch.dim();
        let flat: Vec<f32> = batch.iter().map(|&v| v as f32).collect();
        Tensor::from_slice(&flat)
            .reshape([rows as i64, cols as i64])
            .to_device(self.device)
    }

    fn to_array(tensor: &Tensor, rows: usize, cols: usize) -> Array2<f64> {
        let host = tensor.to_device(Device::Cpu).to_kind(Kind::Double).flatten(0, -1);
        let flat = Vec::<f64>::try_from(&host).unwrap_or_default();
        Array2::from_shape_vec((rows, cols), flat).unwrap_or_else(|_| Array2::zeros((rows, cols)))
    }

    /// Variables sorted by name, which fixes the flat parameter order.
    fn sorted_variables(&self) -> Vec<(String, Tensor)> {
        let mut vars: Vec<(String, Tensor)> = self.vs.variables().into_iter().collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }

    fn spec_path(path: &Path) -> PathBuf {
        path.with_extension("spec.json")
    }
}

impl Model for TorchModel {
    const FILE_EXTENSION: &'static str = "ot";

    fn new(spec: &NetworkSpec, seed: u64) -> Self {
        tch::manual_seed(seed as i64);
        match Self::build(spec, Device::cuda_if_available()) {
            Ok(model) => model,
            Err(e) => panic!("failed to build libtorch model: {e}"),
        }
    }

    fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    fn predict(&self, inputs: ArrayView2<f64>) -> Array2<f64> {
        let rows = inputs.nrows();
        let x = self.to_tensor(inputs);
        let y = tch::no_grad(|| self.net.forward(&x));
        Self::to_array(&y, rows, self.spec.output_dim)
    }

    fn fit(&mut self, inputs: ArrayView2<f64>, targets: ArrayView2<f64>) -> f64 {
        if inputs.nrows() == 0 {
            return 0.0;
        }
        let x = self.to_tensor(inputs);
        let t = self.to_tensor(targets);
        let loss = self.net.forward(&x).mse_loss(&t, Reduction::Mean);
        self.opt.backward_step(&loss);
        f64::try_from(&loss).unwrap_or(f64::NAN)
    }

    fn input_gradient(&self, inputs: ArrayView2<f64>, output_grad: ArrayView2<f64>) -> Array2<f64> {
        let (rows, cols) = inputs.dim();
        let x = self.to_tensor(inputs).set_requires_grad(true);
        let g = self.to_tensor(output_grad);
        let surrogate = (self.net.forward(&x) * g).sum(Kind::Float);
        let grads = Tensor::run_backward(&[surrogate], &[&x], false, false);
        Self::to_array(&grads[0], rows, cols)
    }

    fn apply_output_gradient(&mut self, inputs: ArrayView2<f64>, output_grad: ArrayView2<f64>) {
        if inputs.nrows() == 0 {
            return;
        }
        let x = self.to_tensor(inputs);
        let g = self.to_tensor(output_grad);
        let surrogate = (self.net.forward(&x) * g).sum(Kind::Float);
        self.opt.backward_step(&surrogate);
    }

    fn parameters(&self) -> Vec<f64> {
        let mut flat = Vec::new();
        for (_, var) in self.sorted_variables() {
            let host = var.to_device(Device::Cpu).to_kind(Kind::Double).flatten(0, -1);
            flat.extend(Vec::<f64>::try_from(&host).unwrap_or_default());
        }
        flat
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<(), ModelError> {
        let vars = self.sorted_variables();
        let expected: usize = vars.iter().map(|(_, v)| v.numel()).sum();
        if params.len() != expected {
            return Err(ModelError::ParameterCount {
                expected,
                actual: params.len(),
            });
        }
        let mut offset = 0;
        tch::no_grad(|| {
            for (_, mut var) in vars {
                let n = var.numel();
                let chunk: Vec<f32> = params[offset..offset + n].iter().map(|&p| p as f32).collect();
                let src = Tensor::from_slice(&chunk)
                    .reshape(var.size())
                    .to_device(self.device);
                var.copy_(&src);
                offset += n;
            }
        });
        Ok(())
    }

    fn duplicate(&self) -> Self {
        let mut copy = match Self::build(&self.spec, self.device) {
            Ok(model) => model,
            Err(e) => panic!("failed to build libtorch model: {e}"),
        };
        if let Err(e) = copy.vs.copy(&self.vs) {
            panic!("failed to copy libtorch variables: {e}");
        }
        copy
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        self.vs.save(path)?;
        let writer = BufWriter::new(File::create(Self::spec_path(path))?);
        serde_json::to_writer(writer, &self.spec)?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Self, ModelError> {
        let spec_path = Self::spec_path(path);
        if !path.exists() || !spec_path.exists() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }
        let spec: NetworkSpec = serde_json::from_reader(BufReader::new(File::open(spec_path)?))?;
        let mut model = Self::build(&spec, Device::cuda_if_available())?;
        model.vs.load(path)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::soft_update;

    #[test]
    fn actor_forward_shape() {
        let actor = TorchModel::new(&NetworkSpec::actor(6, 2, &[32, 16], 1e-3), 0);
        let out = actor.predict(Array2::zeros((4, 6)).view());
        assert_eq!(out.dim(), (4, 2));
        assert!(out.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn critic_input_gradient_shape() {
        let critic = TorchModel::new(&NetworkSpec::critic(4, 2, &[16], 1e-3), 0);
        let grad = critic.input_gradient(
            Array2::from_elem((3, 6), 0.1).view(),
            Array2::from_elem((3, 1), 1.0).view(),
        );
        assert_eq!(grad.dim(), (3, 6));
    }

    #[test]
    fn duplicate_then_blend() {
        let a = TorchModel::new(&NetworkSpec::critic(2, 1, &[8], 1e-3), 1);
        let mut b = a.duplicate();
        assert_eq!(a.parameters(), b.parameters());
        soft_update(&a, &mut b, 0.5).unwrap();
    }

    #[test]
    fn duplicate_does_not_reseed() {
        let a = TorchModel::new(&NetworkSpec::actor(2, 1, &[4], 1e-3), 3);
        let _ = a.duplicate();
        let first = Vec::<f64>::try_from(&Tensor::randn([4], (Kind::Double, Device::Cpu))).unwrap();
        let _ = a.duplicate();
        let second = Vec::<f64>::try_from(&Tensor::randn([4], (Kind::Double, Device::Cpu))).unwrap();
        assert_ne!(first, second);
    }
}
