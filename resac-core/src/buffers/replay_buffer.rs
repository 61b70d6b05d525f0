use super::{ACTION, ENV_OBS, MASK, NEXT_ENV_OBS, REWARD};
use crate::env::{EnvMeta, Space};
use crate::error::SacError;
use crate::rng::RngKey;
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use rand::Rng;
use std::collections::BTreeMap;

/// Per-env shape and dtype of one stored field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl FieldSpec {
    pub fn new(shape: Vec<usize>, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(vec![], dtype)
    }

    fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

pub type Schema = BTreeMap<String, FieldSpec>;

// every supported dtype is exactly representable as f32
fn supported_dtype(dtype: DType) -> bool {
    matches!(dtype, DType::F32 | DType::F16 | DType::BF16 | DType::U8)
}

struct FieldStorage {
    spec: FieldSpec,
    // row major [capacity_per_env, num_envs, ...spec.shape]
    data: Vec<f32>,
}

/// Fixed-capacity ring of timesteps, each holding one row per parallel environment.
pub struct ReplayBuffer {
    fields: BTreeMap<String, FieldStorage>,
    capacity_per_env: usize,
    num_envs: usize,
    cursor: usize,
    size: usize,
    device: Device,
}

impl ReplayBuffer {
    pub fn new(
        buffer_size: usize,
        num_envs: usize,
        schema: Schema,
        device: &Device,
    ) -> Result<Self> {
        if schema.is_empty() {
            return Err(SacError::config("replay buffer schema is empty").into());
        }
        if buffer_size == 0 || num_envs == 0 {
            return Err(SacError::config(format!(
                "replay buffer needs a positive size and env count, \
                 got {buffer_size} and {num_envs}"
            ))
            .into());
        }
        let capacity_per_env = buffer_size.div_ceil(num_envs);
        let mut fields = BTreeMap::new();
        for (name, spec) in schema {
            if !supported_dtype(spec.dtype) {
                return Err(SacError::config(format!(
                    "replay buffer field `{name}` has unsupported dtype {:?}",
                    spec.dtype
                ))
                .into());
            }
            let data = vec![0.; capacity_per_env * num_envs * spec.numel()];
            fields.insert(name, FieldStorage { spec, data });
        }
        Ok(Self {
            fields,
            capacity_per_env,
            num_envs,
            cursor: 0,
            size: 0,
            device: device.clone(),
        })
    }

    /// The standard SAC transition schema for an environment.
    pub fn for_transitions(
        buffer_size: usize,
        num_envs: usize,
        meta: &EnvMeta,
        device: &Device,
    ) -> Result<Self> {
        if let Space::Discrete(_) = meta.action_space {
            return Err(
                SacError::UnsupportedSpace("SAC needs a continuous action space".into()).into(),
            );
        }
        let obs = FieldSpec::new(meta.observation_shape(), meta.dtype);
        let schema = Schema::from([
            (ENV_OBS.to_string(), obs.clone()),
            (NEXT_ENV_OBS.to_string(), obs),
            (ACTION.to_string(), FieldSpec::new(vec![meta.action_dim()], DType::F32)),
            (REWARD.to_string(), FieldSpec::scalar(DType::F32)),
            (MASK.to_string(), FieldSpec::scalar(DType::F32)),
        ]);
        Self::new(buffer_size, num_envs, schema, device)
    }

    /// Filled timesteps per environment.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity_per_env
    }

    pub fn capacity_per_env(&self) -> usize {
        self.capacity_per_env
    }

    pub fn num_envs(&self) -> usize {
        self.num_envs
    }

    pub fn schema(&self) -> Schema {
        self.fields
            .iter()
            .map(|(name, storage)| (name.clone(), storage.spec.clone()))
            .collect()
    }

    /// Writes one timestep. Each tensor is `[num_envs, ...field_shape]`. All fields are checked
    /// before anything is written, so a rejected call leaves the buffer untouched.
    pub fn store(&mut self, fields: &[(&str, &Tensor)]) -> Result<()> {
        let mut rows = Vec::with_capacity(fields.len());
        for (name, tensor) in fields {
            let Some(storage) = self.fields.get(*name) else {
                return Err(SacError::UnknownField(name.to_string()).into());
            };
            let mut expected = vec![self.num_envs];
            expected.extend_from_slice(&storage.spec.shape);
            if tensor.dims() != expected.as_slice() {
                return Err(SacError::ShapeMismatch {
                    field: name.to_string(),
                    expected,
                    actual: tensor.dims().to_vec(),
                }
                .into());
            }
            if tensor.dtype() != storage.spec.dtype {
                return Err(SacError::DTypeMismatch {
                    field: name.to_string(),
                    expected: storage.spec.dtype,
                    actual: tensor.dtype(),
                }
                .into());
            }
            let row = tensor.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
            rows.push((*name, row));
        }
        if let Some(missing) = self
            .fields
            .keys()
            .find(|name| !rows.iter().any(|(given, _)| *given == name.as_str()))
        {
            return Err(SacError::MissingField(missing.clone()).into());
        }

        let cursor = self.cursor;
        for (name, row) in rows {
            if let Some(storage) = self.fields.get_mut(name) {
                let offset = cursor * row.len();
                storage.data[offset..offset + row.len()].copy_from_slice(&row);
            }
        }
        self.cursor = (self.cursor + 1) % self.capacity_per_env;
        self.size = (self.size + 1).min(self.capacity_per_env);
        Ok(())
    }

    /// Uniform draw with replacement over every filled `(timestep, env)` pair. Each returned
    /// field is `[batch_size, ...field_shape]` in its schema dtype.
    pub fn sample_random_batch(
        &self,
        key: RngKey,
        batch_size: usize,
    ) -> Result<BTreeMap<String, Tensor>> {
        if self.size == 0 {
            return Err(SacError::EmptyBuffer.into());
        }
        if batch_size == 0 {
            return Err(SacError::config("batch size must be positive").into());
        }
        // rows 0..size are always the filled ones, whether or not the ring has wrapped
        let filled = self.size * self.num_envs;
        let mut rng = key.into_rng();
        let indices: Vec<usize> = (0..batch_size)
            .map(|_| rng.random_range(0..filled))
            .collect();

        let mut batch = BTreeMap::new();
        for (name, storage) in &self.fields {
            let numel = storage.spec.numel();
            let mut data = Vec::with_capacity(batch_size * numel);
            for idx in &indices {
                data.extend_from_slice(&storage.data[idx * numel..(idx + 1) * numel]);
            }
            let mut shape = vec![batch_size];
            shape.extend_from_slice(&storage.spec.shape);
            let tensor =
                Tensor::from_vec(data, shape, &self.device)?.to_dtype(storage.spec.dtype)?;
            batch.insert(name.clone(), tensor);
        }
        Ok(batch)
    }

    pub fn sample_transitions(&self, key: RngKey, batch_size: usize) -> Result<TransitionBatch> {
        TransitionBatch::from_fields(self.sample_random_batch(key, batch_size)?)
    }
}

/// A sampled batch of transitions. Rewards and masks are `[batch]`.
#[derive(Debug, Clone)]
pub struct TransitionBatch {
    pub observations: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub next_observations: Tensor,
    pub masks: Tensor,
}

impl TransitionBatch {
    pub fn from_fields(mut fields: BTreeMap<String, Tensor>) -> Result<Self> {
        let mut take = |name: &str| {
            fields
                .remove(name)
                .ok_or_else(|| SacError::MissingField(name.to_string()))
        };
        Ok(Self {
            observations: take(ENV_OBS)?,
            actions: take(ACTION)?,
            rewards: take(REWARD)?,
            next_observations: take(NEXT_ENV_OBS)?,
            masks: take(MASK)?,
        })
    }
}
