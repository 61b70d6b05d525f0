//! Inverted pendulum swing-up with gymnasium's `Pendulum-v1` dynamics: one torque action in
//! `[-2, 2]`, observations `[cos(theta), sin(theta), theta_dot]`, episodes only end by time
//! limit.

use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng, rngs::StdRng};
use resac_core::{
    env::{Env, EnvMeta, FunctionalEnv, SnapShot, Space, StepInfo, StepOutput},
    error::SacError,
    rng::RngKey,
};
use std::f32::consts::PI;

const MAX_SPEED: f32 = 8.0;
const MAX_TORQUE: f32 = 2.0;
const DT: f32 = 0.05;
const G: f32 = 10.0;
const M: f32 = 1.0;
const L: f32 = 1.0;
pub const MAX_STEPS: u32 = 200;

fn angle_normalize(angle: f32) -> f32 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

/// One integration step, returning the new angle, the new angular velocity and the reward.
pub fn pendulum_dynamics(theta: f32, theta_dot: f32, action: f32) -> (f32, f32, f32) {
    let torque = action.clamp(-MAX_TORQUE, MAX_TORQUE);
    let norm_theta = angle_normalize(theta);
    let cost = norm_theta * norm_theta + 0.1 * theta_dot * theta_dot + 0.001 * torque * torque;
    let new_theta_dot = (theta_dot
        + (3.0 * G / (2.0 * L) * theta.sin() + 3.0 / (M * L * L) * torque) * DT)
        .clamp(-MAX_SPEED, MAX_SPEED);
    let new_theta = theta + new_theta_dot * DT;
    (new_theta, new_theta_dot, -cost)
}

fn pendulum_meta() -> EnvMeta {
    EnvMeta::new(
        Space::Continuous {
            min: Some(vec![-1., -1., -MAX_SPEED]),
            max: Some(vec![1., 1., MAX_SPEED]),
            shape: vec![3],
        },
        Space::bounded(vec![-MAX_TORQUE], vec![MAX_TORQUE]),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendulumState {
    pub theta: Vec<f32>,
    pub theta_dot: Vec<f32>,
    pub ticks: Vec<u32>,
}

impl PendulumState {
    fn observations(&self, device: &Device) -> Result<Tensor> {
        let obs: Vec<f32> = self
            .theta
            .iter()
            .zip(&self.theta_dot)
            .flat_map(|(theta, theta_dot)| [theta.cos(), theta.sin(), *theta_dot])
            .collect();
        Ok(Tensor::from_vec(obs, (self.theta.len(), 3), device)?)
    }
}

/// Vectorized pendulum as a pure function of `(key, state, action)`.
#[derive(Debug, Clone)]
pub struct Pendulum {
    num_envs: usize,
    max_steps: u32,
    device: Device,
}

impl Pendulum {
    pub fn new(num_envs: usize, max_steps: u32, device: &Device) -> Result<Self> {
        ensure!(
            num_envs > 0 && max_steps > 0,
            SacError::config("pendulum needs at least one env and one step per episode")
        );
        Ok(Self {
            num_envs,
            max_steps,
            device: device.clone(),
        })
    }

    pub fn with_defaults(num_envs: usize, device: &Device) -> Result<Self> {
        Self::new(num_envs, MAX_STEPS, device)
    }

    // [theta, theta_dot] pairs for every env
    fn initial_conditions(&self, key: RngKey) -> Vec<f32> {
        key.uniform(&[-PI, -1.], &[PI, 1.], self.num_envs)
    }
}

impl FunctionalEnv for Pendulum {
    type State = PendulumState;

    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn env_meta(&self) -> EnvMeta {
        pendulum_meta()
    }

    fn reset(&self, key: RngKey) -> Result<(Tensor, PendulumState)> {
        let init = self.initial_conditions(key);
        let state = PendulumState {
            theta: init.iter().step_by(2).copied().collect(),
            theta_dot: init.iter().skip(1).step_by(2).copied().collect(),
            ticks: vec![0; self.num_envs],
        };
        Ok((state.observations(&self.device)?, state))
    }

    fn step(
        &self,
        key: RngKey,
        state: &PendulumState,
        actions: &Tensor,
    ) -> Result<(StepOutput, PendulumState)> {
        ensure!(
            actions.dims() == [self.num_envs, 1],
            SacError::ShapeMismatch {
                field: "action".into(),
                expected: vec![self.num_envs, 1],
                actual: actions.dims().to_vec(),
            }
        );
        let actions: Vec<f32> = actions.flatten_all()?.to_vec1()?;
        let mut reached = state.clone();
        let mut reward = Vec::with_capacity(self.num_envs);
        for env_idx in 0..self.num_envs {
            let (theta, theta_dot, r) = pendulum_dynamics(
                state.theta[env_idx],
                state.theta_dot[env_idx],
                actions[env_idx],
            );
            reached.theta[env_idx] = theta;
            reached.theta_dot[env_idx] = theta_dot;
            reached.ticks[env_idx] += 1;
            reward.push(r);
        }
        let done: Vec<bool> = reached.ticks.iter().map(|t| *t >= self.max_steps).collect();

        let init = self.initial_conditions(key);
        let mut next = reached.clone();
        for (env_idx, done) in done.iter().enumerate() {
            if *done {
                next.theta[env_idx] = init[2 * env_idx];
                next.theta_dot[env_idx] = init[2 * env_idx + 1];
                next.ticks[env_idx] = 0;
            }
        }
        let output = StepOutput {
            next_obs: next.observations(&self.device)?,
            final_obs: reached.observations(&self.device)?,
            reward,
            info: StepInfo {
                truncated: done.clone(),
            },
            done,
        };
        Ok((output, next))
    }
}

/// Single stateful pendulum, for driving the same dynamics through `SequentialVecEnv`.
pub struct PendulumEnv {
    theta: f32,
    theta_dot: f32,
    ticks: u32,
    max_steps: u32,
    rng: StdRng,
    device: Device,
}

impl PendulumEnv {
    pub fn new(max_steps: u32, device: &Device) -> Self {
        Self {
            theta: 0.,
            theta_dot: 0.,
            ticks: 0,
            max_steps,
            rng: StdRng::seed_from_u64(0),
            device: device.clone(),
        }
    }

    fn observation(&self) -> Result<Tensor> {
        let obs = vec![self.theta.cos(), self.theta.sin(), self.theta_dot];
        Ok(Tensor::from_vec(obs, 3, &self.device)?)
    }
}

impl Env for PendulumEnv {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        self.rng = StdRng::seed_from_u64(seed);
        self.theta = self.rng.random_range(-PI..PI);
        self.theta_dot = self.rng.random_range(-1f32..1.);
        self.ticks = 0;
        self.observation()
    }

    fn step(&mut self, action: &Tensor) -> Result<SnapShot> {
        let action: Vec<f32> = action.flatten_all()?.to_vec1()?;
        let torque = action.first().copied().unwrap_or_default();
        let (theta, theta_dot, reward) = pendulum_dynamics(self.theta, self.theta_dot, torque);
        self.theta = theta;
        self.theta_dot = theta_dot;
        self.ticks += 1;
        Ok(SnapShot {
            state: self.observation()?,
            reward,
            terminated: false,
            truncated: self.ticks >= self.max_steps,
        })
    }

    fn env_meta(&self) -> EnvMeta {
        pendulum_meta()
    }
}
