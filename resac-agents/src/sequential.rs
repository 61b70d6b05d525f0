use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder, linear};
use either::Either;

#[derive(Debug, Clone)]
pub struct LinearLayer(Linear);

impl LinearLayer {
    pub fn new(in_dim: usize, out_dim: usize, vb: &VarBuilder, prefix: &str) -> Result<Self> {
        Ok(Self(linear(in_dim, out_dim, vb.pp(prefix))?))
    }
}

impl Module for LinearLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.0.forward(xs)
    }
}

#[derive(Debug, Clone)]
pub struct ActivationLayer(pub Activation);

impl Module for ActivationLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.0.forward(xs)
    }
}

#[derive(Debug, Clone)]
pub struct Layer(pub Either<LinearLayer, ActivationLayer>);

impl Layer {
    pub fn linear(linear: LinearLayer) -> Self {
        Self(Either::Left(linear))
    }

    pub fn activation(activation: ActivationLayer) -> Self {
        Self(Either::Right(activation))
    }
}

impl Module for Layer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match &self.0 {
            Either::Left(linear) => linear.forward(xs),
            Either::Right(activation) => activation.forward(xs),
        }
    }
}

#[derive(Default, Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    pub fn add_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in self.layers.iter() {
            xs = layer.forward(&xs)?
        }
        Ok(xs)
    }
}

/// Linear layers of the given sizes with ReLU in between; the last layer stays linear.
/// Variables are named `{prefix}{layer_idx}.weight` and `{prefix}{layer_idx}.bias`, so two
/// networks built with the same prefix have matching parameter names.
pub fn build_sequential(
    input_dim: usize,
    layers: &[usize],
    vb: &VarBuilder,
    prefix: &str,
) -> Result<Sequential> {
    let mut last_dim = input_dim;
    let mut nn = Sequential::default();
    let num_layers = layers.len();
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        let layer_pp = format!("{prefix}{layer_idx}");
        let lin_layer = LinearLayer::new(last_dim, *layer_size, vb, &layer_pp)?;
        nn = nn.add_layer(Layer::linear(lin_layer));
        if layer_idx != num_layers - 1 {
            nn = nn.add_layer(Layer::activation(ActivationLayer(Activation::Relu)));
        }
        last_dim = *layer_size;
    }
    Ok(nn)
}

/// `build_sequential` with the hidden sizes followed by an `output_dim` head.
pub fn build_mlp(
    input_dim: usize,
    hidden: &[usize],
    output_dim: usize,
    vb: &VarBuilder,
    prefix: &str,
) -> Result<Sequential> {
    let mut layers = hidden.to_vec();
    layers.push(output_dim);
    build_sequential(input_dim, &layers, vb, prefix)
}

#[cfg(test)]
mod test {
    use super::build_mlp;
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{Module, VarBuilder, VarMap};

    #[test]
    fn mlp_shapes_and_names() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mlp = build_mlp(3, &[8, 8], 2, &vb, "q")?;
        // three linear layers and two activations
        assert_eq!(mlp.len(), 5);
        let out = mlp.forward(&Tensor::zeros((4, 3), DType::F32, &Device::Cpu)?)?;
        assert_eq!(out.dims(), &[4, 2]);
        let data = varmap.data().lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        let mut names: Vec<_> = data.keys().cloned().collect();
        names.sort();
        assert_eq!(
            names,
            vec!["q0.bias", "q0.weight", "q1.bias", "q1.weight", "q2.bias", "q2.weight"]
        );
        Ok(())
    }
}
