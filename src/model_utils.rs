use tch::{nn, Device, Kind, Tensor};

/// Where the distribution of a head is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    /// Same device as the incoming embeddings.
    #[default]
    Inherit,
    /// Always the CPU. Results are moved back to the embedding device.
    Cpu,
    Device(Device),
}

impl Placement {
    /// Resolves the compute device for embeddings living on `embedding_device`.
    pub fn resolve(self, embedding_device: Device) -> Device {
        match self {
            Placement::Inherit => embedding_device,
            Placement::Cpu => Device::Cpu,
            Placement::Device(device) => device,
        }
    }
}

/// Returns a `[rows, cols]` matrix with orthonormal rows (or columns, whichever
/// is shorter), scaled by `gain`.
pub fn orthogonal(rows: i64, cols: i64, gain: f64, device: Device) -> Tensor {
    let flat = Tensor::randn(&[rows.max(cols), rows.min(cols)], (Kind::Float, device));
    let (q, r) = Tensor::linalg_qr(&flat, "reduced");
    // Sign-correct by diag(R) so Q is unique
    let q = q * r.diagonal(0, -2, -1).sign().unsqueeze(0);
    let q = if rows < cols { q.tr() } else { q };
    q * gain
}

/// Initializes a linear layer in place: orthogonal weights scaled by `gain`,
/// bias filled with `bias_const`.
pub fn layer_init(layer: &mut nn::Linear, gain: f64, bias_const: f64) {
    let size = layer.ws.size();
    let (rows, cols) = (size[0], size[1]);
    let weights = orthogonal(rows, cols, gain, layer.ws.device());
    tch::no_grad(|| {
        layer.ws.copy_(&weights);
        if let Some(bs) = layer.bs.as_mut() {
            let _ = bs.fill_(bias_const);
        }
    });
}
