pub use anyhow::{bail, ensure, format_err, Context as _, Result};
pub use approx::assert_abs_diff_eq;
pub use getset::{CopyGetters, Getters};
pub use indexmap::IndexMap;
pub use itertools::{chain, iproduct, izip, Itertools as _};
pub use log::{debug, info, warn};
pub use noisy_float::prelude::*;
pub use num_traits::{Float, Num};
pub use serde::{Deserialize, Serialize};
pub use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt::{self, Debug},
    fs, iter,
    ops::Mul,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use tch::{
    kind::FLOAT_CPU,
    nn::{self, ModuleT as _},
    vision, Device, IndexOp, Kind, Tensor,
};
