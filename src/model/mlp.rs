//! Pure-Rust multilayer perceptron.
//!
//! Dense layers with ReLU hidden activations, an identity or tanh output,
//! hand-written backpropagation and an Adam optimizer. Small enough for the
//! low-dimensional control problems this crate targets, and it keeps the
//! default build free of native dependencies.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{Model, ModelError, NetworkSpec, OutputActivation};

/// Standard deviation of the initial weights.
const INIT_STDDEV: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Dense {
    /// `(fan_in, fan_out)`
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl Dense {
    fn new(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        let weights = Array2::from_shape_fn((fan_in, fan_out), |_| {
            rng.sample::<f64, _>(StandardNormal) * INIT_STDDEV
        });
        Self {
            weights,
            bias: Array1::zeros(fan_out),
        }
    }

    fn len(&self) -> usize {
        self.weights.len() + self.bias.len()
    }
}

/// Adam over a flat parameter vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Adam {
    fn new(learning_rate: f64, n_params: usize) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
        }
    }

    fn step(&mut self, params: &mut [f64], grads: &[f64]) {
        debug_assert_eq!(params.len(), grads.len());
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t);
        let bc2 = 1.0 - self.beta2.powi(self.t);
        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = self.beta1 * self.m[i] + (1.0 - self.beta1) * g;
            self.v[i] = self.beta2 * self.v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

/// Fully connected feed-forward network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    spec: NetworkSpec,
    layers: Vec<Dense>,
    optimizer: Adam,
}

impl Mlp {
    /// Activations of every layer, starting with the input itself.
    fn forward(&self, inputs: ArrayView2<f64>) -> Vec<Array2<f64>> {
        let last = self.layers.len() - 1;
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(inputs.to_owned());
        for (i, layer) in self.layers.iter().enumerate() {
            let z = activations[i].dot(&layer.weights) + &layer.bias;
            let a = if i < last {
                z.mapv(|x| x.max(0.0))
            } else {
                match self.spec.output_activation {
                    OutputActivation::Identity => z,
                    OutputActivation::Tanh => z.mapv(f64::tanh),
                }
            };
            activations.push(a);
        }
        activations
    }

    /// Backpropagates `output_grad` through the cached activations.
    ///
    /// Returns the flat parameter gradient (same order as
    /// [`Model::parameters`]) and the gradient with respect to the input.
    fn backward(
        &self,
        activations: &[Array2<f64>],
        output_grad: ArrayView2<f64>,
    ) -> (Vec<f64>, Array2<f64>) {
        let n_layers = self.layers.len();
        let mut delta = match self.spec.output_activation {
            OutputActivation::Identity => output_grad.to_owned(),
            OutputActivation::Tanh => {
                output_grad.to_owned() * activations[n_layers].mapv(|y| 1.0 - y * y)
            }
        };

        let mut per_layer = Vec::with_capacity(n_layers);
        for l in (0..n_layers).rev() {
            let grad_w = activations[l].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            let mut upstream = delta.dot(&self.layers[l].weights.t());
            if l > 0 {
                // ReLU: no gradient where the unit was inactive.
                upstream.zip_mut_with(&activations[l], |g, a| {
                    if *a <= 0.0 {
                        *g = 0.0;
                    }
                });
            }
            per_layer.push((grad_w, grad_b));
            delta = upstream;
        }
        per_layer.reverse();

        let mut flat = Vec::with_capacity(self.n_params());
        for (grad_w, grad_b) in per_layer {
            flat.extend(grad_w.iter());
            flat.extend(grad_b.iter());
        }
        (flat, delta)
    }

    fn n_params(&self) -> usize {
        self.layers.iter().map(Dense::len).sum()
    }

    fn descend(&mut self, grads: &[f64]) {
        let mut params = self.parameters();
        self.optimizer.step(&mut params, grads);
        self.write_parameters(&params);
    }

    fn write_parameters(&mut self, params: &[f64]) {
        let mut values = params.iter().copied();
        for layer in &mut self.layers {
            for (w, v) in layer.weights.iter_mut().zip(values.by_ref()) {
                *w = v;
            }
            for (b, v) in layer.bias.iter_mut().zip(values.by_ref()) {
                *b = v;
            }
        }
    }
}

impl Model for Mlp {
    const FILE_EXTENSION: &'static str = "json";

    fn new(spec: &NetworkSpec, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sizes = spec.layer_sizes();
        let layers: Vec<Dense> = sizes
            .windows(2)
            .map(|w| Dense::new(w[0], w[1], &mut rng))
            .collect();
        let n_params = layers.iter().map(Dense::len).sum();
        Self {
            spec: spec.clone(),
            layers,
            optimizer: Adam::new(spec.learning_rate, n_params),
        }
    }

    fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    fn predict(&self, inputs: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(inputs.ncols(), self.spec.input_dim, "input width mismatch");
        self.forward(inputs).pop().unwrap_or_default()
    }

    fn fit(&mut self, inputs: ArrayView2<f64>, targets: ArrayView2<f64>) -> f64 {
        assert_eq!(inputs.nrows(), targets.nrows(), "batch size mismatch");
        if inputs.nrows() == 0 {
            return 0.0;
        }
        let activations = self.forward(inputs);
        let diff = &activations[self.layers.len()] - &targets;
        let loss = diff.mapv(|d| d * d).mean().unwrap_or(0.0);
        let scale = 2.0 / diff.len() as f64;
        let output_grad = diff.mapv(|d| d * scale);
        let (grads, _) = self.backward(&activations, output_grad.view());
        self.descend(&grads);
        loss
    }

    fn input_gradient(&self, inputs: ArrayView2<f64>, output_grad: ArrayView2<f64>) -> Array2<f64> {
        let activations = self.forward(inputs);
        let (_, input_grad) = self.backward(&activations, output_grad);
        input_grad
    }

    fn apply_output_gradient(&mut self, inputs: ArrayView2<f64>, output_grad: ArrayView2<f64>) {
        if inputs.nrows() == 0 {
            return;
        }
        let activations = self.forward(inputs);
        let (grads, _) = self.backward(&activations, output_grad);
        self.descend(&grads);
    }

    fn parameters(&self) -> Vec<f64> {
        let mut flat = Vec::with_capacity(self.n_params());
        for layer in &self.layers {
            flat.extend(layer.weights.iter());
            flat.extend(layer.bias.iter());
        }
        flat
    }

    fn set_parameters(&mut self, params: &[f64]) -> Result<(), ModelError> {
        let expected = self.n_params();
        if params.len() != expected {
            return Err(ModelError::ParameterCount {
                expected,
                actual: params.len(),
            });
        }
        self.write_parameters(params);
        Ok(())
    }

    fn duplicate(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            layers: self.layers.clone(),
            optimizer: Adam::new(self.spec.learning_rate, self.n_params()),
        }
    }

    fn save(&self, path: &Path) -> Result<(), ModelError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::NotFound(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
