use ndarray::{Array1, Array2, ArrayD, Axis, Ix1, Ix3, IxDyn};
use std::sync::Arc;
use thiserror::Error;

pub type NodeId = usize;

#[derive(Error, Debug)]
pub enum TapeError {
    #[error("node {node} is not connected to the differentiated output")]
    Disconnected { node: NodeId },
}

/// Operations recorded on the tape.
///
/// The set is closed under differentiation: every vector-Jacobian product in
/// `Tape::grad` is expressed with these same operations, which is what makes
/// second and third derivatives possible.
#[derive(Clone)]
enum Op {
    Leaf,
    Relu(NodeId),
    /// Heaviside mask of the input; its own derivative is zero a.e.
    Step(NodeId),
    Add(NodeId, NodeId),
    Sub(NodeId, NodeId),
    Mul(NodeId, NodeId),
    Scale(NodeId, f32),
    AddScalar(NodeId, f32),
    /// Reduce to a single-element tensor.
    SumAll(NodeId),
    /// Replicate a single-element tensor to `shape`.
    Broadcast(NodeId, Vec<usize>),
    /// H x W x C -> C (sum over the two spatial axes).
    SumSpatial(NodeId),
    /// C -> H x W x C (replicate across the spatial axes).
    BroadcastSpatial(NodeId, usize, usize),
    /// W.dot(x) for a constant weight matrix W.
    MatVec(Arc<Array2<f32>>, NodeId),
    /// W.t().dot(x), the adjoint of `MatVec`.
    MatVecT(Arc<Array2<f32>>, NodeId),
    Sigmoid(NodeId),
    Softmax(NodeId),
    /// Vector -> single-element tensor at `idx`.
    Select(NodeId, usize),
    /// Single-element tensor -> vector of `len` with the value at `idx`.
    Scatter(NodeId, usize, usize),
}

struct Node {
    value: ArrayD<f32>,
    op: Op,
}

#[derive(Default)]
pub struct Tape {
    nodes: Vec<Node>,
}

/// Elementwise binary with single-element broadcast on either side.
fn binary(a: &ArrayD<f32>, b: &ArrayD<f32>, f: impl Fn(f32, f32) -> f32) -> ArrayD<f32> {
    if a.shape() == b.shape() {
        let mut out = a.clone();
        out.zip_mut_with(b, |x, &y| *x = f(*x, y));
        out
    } else if b.len() == 1 {
        let s = b.sum();
        a.mapv(|x| f(x, s))
    } else if a.len() == 1 {
        let s = a.sum();
        b.mapv(|y| f(s, y))
    } else {
        panic!(
            "incompatible shapes for elementwise op: {:?} vs {:?}",
            a.shape(),
            b.shape()
        );
    }
}

fn scalar(v: f32) -> ArrayD<f32> {
    ArrayD::from_elem(IxDyn(&[1]), v)
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn value(&self, id: NodeId) -> &ArrayD<f32> {
        &self.nodes[id].value
    }

    fn push(&mut self, value: ArrayD<f32>, op: Op) -> NodeId {
        self.nodes.push(Node { value, op });
        self.nodes.len() - 1
    }

    pub fn leaf(&mut self, value: ArrayD<f32>) -> NodeId {
        self.push(value, Op::Leaf)
    }

    pub fn relu(&mut self, a: NodeId) -> NodeId {
        let v = self.nodes[a].value.mapv(|x| x.max(0.0));
        self.push(v, Op::Relu(a))
    }

    pub fn step(&mut self, a: NodeId) -> NodeId {
        let v = self.nodes[a].value.mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
        self.push(v, Op::Step(a))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let v = binary(&self.nodes[a].value, &self.nodes[b].value, |x, y| x + y);
        self.push(v, Op::Add(a, b))
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let v = binary(&self.nodes[a].value, &self.nodes[b].value, |x, y| x - y);
        self.push(v, Op::Sub(a, b))
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let v = binary(&self.nodes[a].value, &self.nodes[b].value, |x, y| x * y);
        self.push(v, Op::Mul(a, b))
    }

    pub fn scale(&mut self, a: NodeId, c: f32) -> NodeId {
        let v = self.nodes[a].value.mapv(|x| x * c);
        self.push(v, Op::Scale(a, c))
    }

    pub fn add_scalar(&mut self, a: NodeId, c: f32) -> NodeId {
        let v = self.nodes[a].value.mapv(|x| x + c);
        self.push(v, Op::AddScalar(a, c))
    }

    pub fn sum_all(&mut self, a: NodeId) -> NodeId {
        let v = scalar(self.nodes[a].value.sum());
        self.push(v, Op::SumAll(a))
    }

    pub fn broadcast(&mut self, a: NodeId, shape: &[usize]) -> NodeId {
        debug_assert_eq!(self.nodes[a].value.len(), 1);
        let s = self.nodes[a].value.sum();
        let v = ArrayD::from_elem(IxDyn(shape), s);
        self.push(v, Op::Broadcast(a, shape.to_vec()))
    }

    pub fn sum_spatial(&mut self, a: NodeId) -> NodeId {
        let src = self.nodes[a]
            .value
            .view()
            .into_dimensionality::<Ix3>()
            .expect("sum_spatial input must be H x W x C");
        let v = src.sum_axis(Axis(0)).sum_axis(Axis(0)).into_dyn();
        self.push(v, Op::SumSpatial(a))
    }

    pub fn broadcast_spatial(&mut self, a: NodeId, h: usize, w: usize) -> NodeId {
        let src = self.nodes[a]
            .value
            .view()
            .into_dimensionality::<Ix1>()
            .expect("broadcast_spatial input must be a channel vector");
        let src = src.to_owned();
        let v = ArrayD::from_shape_fn(IxDyn(&[h, w, src.len()]), |d| src[d[2]]);
        self.push(v, Op::BroadcastSpatial(a, h, w))
    }

    pub fn matvec(&mut self, w: Arc<Array2<f32>>, x: NodeId) -> NodeId {
        let xv = self.nodes[x]
            .value
            .view()
            .into_dimensionality::<Ix1>()
            .expect("matvec input must be a vector");
        assert_eq!(w.ncols(), xv.len(), "matvec dimension mismatch");
        let v = w.dot(&xv).into_dyn();
        self.push(v, Op::MatVec(w, x))
    }

    pub fn matvec_t(&mut self, w: Arc<Array2<f32>>, x: NodeId) -> NodeId {
        let xv = self.nodes[x]
            .value
            .view()
            .into_dimensionality::<Ix1>()
            .expect("matvec_t input must be a vector");
        assert_eq!(w.nrows(), xv.len(), "matvec_t dimension mismatch");
        let v = w.t().dot(&xv).into_dyn();
        self.push(v, Op::MatVecT(w, x))
    }

    pub fn sigmoid(&mut self, a: NodeId) -> NodeId {
        let v = self.nodes[a].value.mapv(|x| 1.0 / (1.0 + (-x).exp()));
        self.push(v, Op::Sigmoid(a))
    }

    pub fn softmax(&mut self, a: NodeId) -> NodeId {
        let src = self.nodes[a]
            .value
            .view()
            .into_dimensionality::<Ix1>()
            .expect("softmax input must be a vector");
        let max = src.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Array1<f32> = src.mapv(|x| (x - max).exp());
        let sum = exp.sum();
        let v = exp.mapv(|x| x / sum).into_dyn();
        self.push(v, Op::Softmax(a))
    }

    pub fn select(&mut self, a: NodeId, idx: usize) -> NodeId {
        let src = self.nodes[a]
            .value
            .view()
            .into_dimensionality::<Ix1>()
            .expect("select input must be a vector");
        let v = scalar(src[idx]);
        self.push(v, Op::Select(a, idx))
    }

    pub fn scatter(&mut self, a: NodeId, idx: usize, len: usize) -> NodeId {
        debug_assert_eq!(self.nodes[a].value.len(), 1);
        let s = self.nodes[a].value.sum();
        let mut v = Array1::<f32>::zeros(len);
        v[idx] = s;
        self.push(v.into_dyn(), Op::Scatter(a, idx, len))
    }

    /// Reduce an adjoint to the shape of the operand it flows into.
    /// Broadcasting only ever widens a single-element tensor, so the reverse
    /// is a full sum.
    fn reduce_to(&mut self, u: NodeId, target: NodeId) -> NodeId {
        if self.nodes[u].value.shape() == self.nodes[target].value.shape() {
            u
        } else {
            debug_assert_eq!(self.nodes[target].value.len(), 1);
            self.sum_all(u)
        }
    }

    fn accumulate(&mut self, adjoint: &mut [Option<NodeId>], target: NodeId, g: NodeId) {
        adjoint[target] = Some(match adjoint[target] {
            Some(prev) => self.add(prev, g),
            None => g,
        });
    }

    /// Differentiate node `y` with respect to node `x`.
    ///
    /// The seed adjoint is a tensor of ones, so for a non-scalar `y` this is
    /// the gradient of `sum(y)` — the same convention nested gradient tapes
    /// use. The returned node is itself made of tape operations and can be
    /// differentiated again.
    pub fn grad(&mut self, y: NodeId, x: NodeId) -> Result<NodeId, TapeError> {
        let limit = y + 1;
        let mut adjoint: Vec<Option<NodeId>> = vec![None; limit];
        let seed = ArrayD::from_elem(self.nodes[y].value.raw_dim(), 1.0);
        adjoint[y] = Some(self.leaf(seed));

        for i in (0..limit).rev() {
            let Some(u) = adjoint[i] else { continue };
            let op = self.nodes[i].op.clone();
            match op {
                Op::Leaf | Op::Step(_) => {}
                Op::Relu(a) => {
                    let mask = self.step(a);
                    let g = self.mul(u, mask);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::Add(a, b) => {
                    let ga = self.reduce_to(u, a);
                    self.accumulate(&mut adjoint, a, ga);
                    let gb = self.reduce_to(u, b);
                    self.accumulate(&mut adjoint, b, gb);
                }
                Op::Sub(a, b) => {
                    let ga = self.reduce_to(u, a);
                    self.accumulate(&mut adjoint, a, ga);
                    let neg = self.scale(u, -1.0);
                    let gb = self.reduce_to(neg, b);
                    self.accumulate(&mut adjoint, b, gb);
                }
                Op::Mul(a, b) => {
                    let ua = self.mul(u, b);
                    let ga = self.reduce_to(ua, a);
                    self.accumulate(&mut adjoint, a, ga);
                    let ub = self.mul(u, a);
                    let gb = self.reduce_to(ub, b);
                    self.accumulate(&mut adjoint, b, gb);
                }
                Op::Scale(a, c) => {
                    let g = self.scale(u, c);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::AddScalar(a, _) => {
                    self.accumulate(&mut adjoint, a, u);
                }
                Op::SumAll(a) => {
                    let shape = self.nodes[a].value.shape().to_vec();
                    let g = self.broadcast(u, &shape);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::Broadcast(a, _) => {
                    let g = self.sum_all(u);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::SumSpatial(a) => {
                    let shape = self.nodes[a].value.shape().to_vec();
                    let g = self.broadcast_spatial(u, shape[0], shape[1]);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::BroadcastSpatial(a, _, _) => {
                    let g = self.sum_spatial(u);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::MatVec(w, x_in) => {
                    let g = self.matvec_t(w, u);
                    self.accumulate(&mut adjoint, x_in, g);
                }
                Op::MatVecT(w, x_in) => {
                    let g = self.matvec(w, u);
                    self.accumulate(&mut adjoint, x_in, g);
                }
                Op::Sigmoid(a) => {
                    // d/dx sigmoid = s * (1 - s)
                    let neg = self.scale(i, -1.0);
                    let one_minus = self.add_scalar(neg, 1.0);
                    let us = self.mul(u, i);
                    let g = self.mul(us, one_minus);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::Softmax(a) => {
                    // vjp: p * (u - dot(u, p))
                    let up = self.mul(u, i);
                    let d = self.sum_all(up);
                    let diff = self.sub(u, d);
                    let g = self.mul(i, diff);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::Select(a, idx) => {
                    let len = self.nodes[a].value.len();
                    let g = self.scatter(u, idx, len);
                    self.accumulate(&mut adjoint, a, g);
                }
                Op::Scatter(a, idx, _) => {
                    let g = self.select(u, idx);
                    self.accumulate(&mut adjoint, a, g);
                }
            }
        }

        adjoint[x].ok_or(TapeError::Disconnected { node: x })
    }
}
