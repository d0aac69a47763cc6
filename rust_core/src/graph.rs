use crate::trials::TrialSequence;

/// Unique identifier for a node in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Map from a sampler coordinate (unconstrained) to the model's parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamTransform {
    Identity,
    /// x = exp(raw), x > 0.
    Exp,
    /// x = lower + (upper - lower) * sigmoid(raw).
    BoundedSigmoid { lower: f64, upper: f64 },
}

impl ParamTransform {
    pub fn forward(&self, raw: f64) -> f64 {
        match *self {
            ParamTransform::Identity => raw,
            ParamTransform::Exp => raw.exp(),
            ParamTransform::BoundedSigmoid { lower, upper } => lower + (upper - lower) * sigmoid(raw),
        }
    }

    pub fn inverse(&self, x: f64) -> f64 {
        match *self {
            ParamTransform::Identity => x,
            ParamTransform::Exp => x.ln(),
            ParamTransform::BoundedSigmoid { lower, upper } => {
                let u = (x - lower) / (upper - lower);
                (u / (1.0 - u)).ln()
            }
        }
    }
}

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Operations supported in the computation graph.
#[derive(Debug, Clone)]
pub enum Op {
    /// A free parameter to be sampled (index into the parameter vector).
    Param(usize),
    /// A constant scalar value baked into the graph.
    Constant(f64),
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Exp(NodeId),
    Log(NodeId),
    Sigmoid(NodeId),
    /// Flat density on the open interval: `-ln(upper - lower)` inside, `-inf` on or outside the bounds.
    UniformLogP { x: NodeId, lower: f64, upper: f64 },
    /// Beta(a, b) log density of a variate on (0, 1).
    BetaLogP { x: NodeId, a: f64, b: f64 },
    /// Half-normal log density on (0, inf).
    HalfNormalLogP { x: NodeId, scale: f64 },
    /// Rescorla-Wagner predictions for a stored trial sequence (vector-valued).
    RescorlaWagner {
        alpha: NodeId,
        beta: NodeId,
        trials_idx: usize,
        v_init: f64,
    },
    /// Sum-of-log-probabilities for observed data under Normal(mu_vec, sigma).
    NormalObsLogP {
        mu_vec: NodeId,
        sigma: NodeId,
        obs_data_idx: usize,
    },
    /// Sum-of-log-probabilities for observed data in (0, 1) under Beta(a, b).
    BetaObsLogP {
        a: NodeId,
        b: NodeId,
        obs_data_idx: usize,
    },
}

/// A single node in the computation graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub op: Op,
    pub name: Option<String>,
}

/// The computational graph representing a probabilistic model.
///
/// Stores nodes in topological order (each node only references earlier nodes).
/// Trial sequences and observed values are stored separately from the graph
/// structure so the graph itself stays lightweight and shareable across threads.
#[derive(Debug, Clone)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub param_count: usize,
    pub trial_sets: Vec<TrialSequence>,
    pub obs_vectors: Vec<Vec<f64>>,
    pub param_names: Vec<String>,
    pub param_transforms: Vec<ParamTransform>,
    pub logp_terms: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            param_count: 0,
            trial_sets: Vec::new(),
            obs_vectors: Vec::new(),
            param_names: Vec::new(),
            param_transforms: Vec::new(),
            logp_terms: Vec::new(),
        }
    }

    fn add_node(&mut self, op: Op, name: Option<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node { id, op, name });
        id
    }

    pub fn add_param(&mut self, name: &str) -> NodeId {
        self.add_param_with_transform(name, ParamTransform::Identity)
    }

    /// Register a sampler coordinate. The returned node is the *raw*
    /// (unconstrained) value; callers build the constrained value from it.
    pub fn add_param_with_transform(&mut self, name: &str, transform: ParamTransform) -> NodeId {
        let idx = self.param_count;
        self.param_count += 1;
        self.param_names.push(name.to_string());
        self.param_transforms.push(transform);
        self.add_node(Op::Param(idx), Some(format!("{name}__raw")))
    }

    /// Attach a name to an already-built node, e.g. the constrained value of a parameter.
    pub fn name_node(&mut self, id: NodeId, name: &str) {
        self.nodes[id.0].name = Some(name.to_string());
    }

    pub fn add_constant(&mut self, value: f64) -> NodeId {
        self.add_node(Op::Constant(value), None)
    }

    pub fn add_trials(&mut self, trials: TrialSequence) -> usize {
        let idx = self.trial_sets.len();
        self.trial_sets.push(trials);
        idx
    }

    pub fn add_obs_data(&mut self, values: Vec<f64>) -> usize {
        let idx = self.obs_vectors.len();
        self.obs_vectors.push(values);
        idx
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Add(a, b), None)
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Sub(a, b), None)
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.add_node(Op::Mul(a, b), None)
    }

    pub fn exp(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Exp(a), None)
    }

    pub fn log(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Log(a), None)
    }

    pub fn sigmoid(&mut self, a: NodeId) -> NodeId {
        self.add_node(Op::Sigmoid(a), None)
    }

    /// Mark an existing scalar node as an additive log-density term.
    pub fn add_logp_term(&mut self, id: NodeId) {
        self.logp_terms.push(id);
    }

    pub fn uniform_logp(&mut self, x: NodeId, lower: f64, upper: f64) -> NodeId {
        let node = self.add_node(Op::UniformLogP { x, lower, upper }, None);
        self.logp_terms.push(node);
        node
    }

    pub fn beta_logp(&mut self, x: NodeId, a: f64, b: f64) -> NodeId {
        let node = self.add_node(Op::BetaLogP { x, a, b }, None);
        self.logp_terms.push(node);
        node
    }

    pub fn half_normal_logp(&mut self, x: NodeId, scale: f64) -> NodeId {
        let node = self.add_node(Op::HalfNormalLogP { x, scale }, None);
        self.logp_terms.push(node);
        node
    }

    pub fn rescorla_wagner(
        &mut self,
        alpha: NodeId,
        beta: NodeId,
        trials_idx: usize,
        v_init: f64,
    ) -> NodeId {
        self.add_node(
            Op::RescorlaWagner {
                alpha,
                beta,
                trials_idx,
                v_init,
            },
            Some("prediction".to_string()),
        )
    }

    pub fn normal_obs_logp(
        &mut self,
        mu_vec: NodeId,
        sigma: NodeId,
        obs_data_idx: usize,
    ) -> NodeId {
        let node = self.add_node(
            Op::NormalObsLogP {
                mu_vec,
                sigma,
                obs_data_idx,
            },
            None,
        );
        self.logp_terms.push(node);
        node
    }

    pub fn beta_obs_logp(&mut self, a: NodeId, b: NodeId, obs_data_idx: usize) -> NodeId {
        let node = self.add_node(Op::BetaObsLogP { a, b, obs_data_idx }, None);
        self.logp_terms.push(node);
        node
    }

    /// Map an unconstrained position to constrained parameter values.
    pub fn constrain(&self, q: &[f64]) -> Vec<f64> {
        self.param_transforms
            .iter()
            .zip(q)
            .map(|(t, &raw)| t.forward(raw))
            .collect()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
