//! Per-kind intrinsic tables
//!
//! Each entity kind exposes a fixed set of engine intrinsics. A read of member
//! `name` on entity `e` is sent as `<prefix><name>(<finder>(<id>))`, a write as
//! the same expression followed by `=<literal>`. Names outside the table are
//! rejected locally.

use super::HandleKind;
use crate::engine::{EngineError, EngineResult};

/// Intrinsic table and addressing scheme for one entity kind
#[derive(Debug)]
pub struct KindSpec {
    pub kind: HandleKind,
    /// Prefix of every intrinsic name, e.g. `b_`
    pub prefix: &'static str,
    /// Function that turns an id into an entity reference, e.g. `find_ball`
    pub finder: &'static str,
    /// Allowed member names, without the prefix
    pub intrinsics: &'static [&'static str],
}

impl KindSpec {
    pub fn for_kind(kind: HandleKind) -> &'static KindSpec {
        match kind {
            HandleKind::Ball => &BALL,
            HandleKind::Wall => &WALL,
            HandleKind::Contact => &CONTACT,
            HandleKind::Clump => &CLUMP,
            HandleKind::Measurement => &MEASUREMENT,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.intrinsics.contains(&name)
    }

    /// Full intrinsic name for a member, or `UnknownIntrinsic`
    pub fn intrinsic(&self, name: &str) -> EngineResult<String> {
        if !self.contains(name) {
            return Err(EngineError::UnknownIntrinsic {
                kind: self.kind,
                name: name.to_string(),
            });
        }
        Ok(format!("{}{}", self.prefix, name))
    }

    /// Expression addressing the entity with this id
    pub fn find(&self, id: i32) -> String {
        format!("{}({})", self.finder, id)
    }

    /// `<prefix><name>(<address>)`
    pub fn read_expression(&self, name: &str, address: &str) -> EngineResult<String> {
        Ok(format!("{}({})", self.intrinsic(name)?, address))
    }

    /// `<prefix><name>(<address>)=<literal>`
    pub fn write_expression(&self, name: &str, address: &str, literal: &str) -> EngineResult<String> {
        Ok(format!("{}({})={}", self.intrinsic(name)?, address, literal))
    }
}

static BALL: KindSpec = KindSpec {
    kind: HandleKind::Ball,
    prefix: "b_",
    finder: "find_ball",
    intrinsics: &[
        "id", "next", "clist", "ctype", "xfix", "yfix", "zfix", "vfix", "rxfix", "ryfix",
        "rzfix", "rfix", "x", "y", "z", "vpos", "ux", "uy", "uz", "vu", "xvel", "yvel", "zvel",
        "vvel", "rxvel", "ryvel", "rzvel", "rvel", "xfob", "yfob", "zfob", "vfob", "xfap",
        "yfap", "zfap", "vfap", "xmom", "ymom", "zmom", "mom", "rad", "mass", "realmass", "moi",
        "dens", "kn", "ks", "shearmod", "poiss", "fric", "ex", "color", "xmap", "ymap", "zmap",
        "map", "shared", "type", "rot", "damp", "realmoi", "clump", "cllist", "extra", "stress",
        "vrvel", "vmom", "vmap", "vrfix", "xdisp", "ydisp", "zdisp", "vdisp", "delete", "thexp",
        "thfix", "thpob", "thpsrc", "thsheat", "thtemp", "thdeltemp", "perflag", "perBall",
        "xffap", "yffap", "zffap", "vffap", "multi_type", "realmassset", "realmoiset",
    ],
};

static WALL: KindSpec = KindSpec {
    kind: HandleKind::Wall,
    prefix: "w_",
    finder: "find_wall",
    intrinsics: &[
        "id", "next", "type", "x", "y", "z", "pos", "xvel", "yvel", "zvel", "vel", "rxvel",
        "ryvel", "rzvel", "rvel", "xfob", "yfob", "zfob", "fob", "xmom", "ymom", "zmom", "mom",
        "fric", "kn", "ks", "color", "extra", "delete", "radfob", "radvel", "clist",
    ],
};

static CONTACT: KindSpec = KindSpec {
    kind: HandleKind::Contact,
    prefix: "c_",
    finder: "find_contact",
    intrinsics: &[
        "id", "next", "ball1", "ball2", "wall", "type", "x", "y", "z", "pos", "nforce",
        "sforce", "xsforce", "ysforce", "zsforce", "kn", "ks", "fric", "bflag", "nstrength",
        "sstrength", "model", "extra",
    ],
};

static CLUMP: KindSpec = KindSpec {
    kind: HandleKind::Clump,
    prefix: "cl_",
    finder: "find_clump",
    intrinsics: &[
        "id", "next", "list", "add", "rel", "mass", "vol", "moi", "dens", "x", "y", "z", "pos",
        "xvel", "yvel", "zvel", "vel", "rxvel", "ryvel", "rzvel", "rvel", "xfob", "yfob",
        "zfob", "xmom", "ymom", "zmom", "damp", "scale", "extra", "delete",
    ],
};

static MEASUREMENT: KindSpec = KindSpec {
    kind: HandleKind::Measurement,
    prefix: "m_",
    finder: "find_meas",
    intrinsics: &[
        "id", "next", "x", "y", "z", "pos", "rad", "coord", "poros", "sfrac", "vfrac", "s11",
        "s12", "s13", "s21", "s22", "s23", "s31", "s32", "s33", "ed11", "ed12", "ed13", "ed21",
        "ed22", "ed23", "ed31", "ed32", "ed33",
    ],
};
