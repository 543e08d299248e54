//! Test descriptors and the wrappers applied to them.
//!
//! Test functions take one, two or three arguments: the station devices,
//! the AP radios and the run parameters. [`TestFn`] records which shape a
//! test has so [`var_arg_call`] can pass exactly what it declares.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::capability::require_under_vm;
use crate::ctrl::Device;
use crate::error::Result;
use crate::host::ApDev;
use crate::sysctl::{CommandSysctl, Ipv6Disabled, Sysctl};
use crate::util::{parse_bool, ParseIntError};

pub type Devices = [Box<dyn Device>];

/// Per-run parameters handed to three-argument tests.
#[derive(Debug, Clone, Default)]
pub struct TestParams {
    pub name: String,
    pub logdir: PathBuf,
    pub prefix: String,
    pub extra: BTreeMap<String, String>,
}

impl TestParams {
    /// A boolean parameter, `None` when unset.
    pub fn get_bool(&self, key: &str) -> std::result::Result<Option<bool>, ParseIntError> {
        self.extra.get(key).map(|v| parse_bool(v)).transpose()
    }
}

type DevFn = dyn Fn(&Devices) -> Result<()>;
type DevApFn = dyn Fn(&Devices, &[ApDev]) -> Result<()>;
type DevApParamsFn = dyn Fn(&Devices, &[ApDev], &TestParams) -> Result<()>;

pub enum TestFn {
    Dev(Box<DevFn>),
    DevAp(Box<DevApFn>),
    DevApParams(Box<DevApParamsFn>),
}

impl TestFn {
    pub fn dev(f: impl Fn(&Devices) -> Result<()> + 'static) -> Self {
        TestFn::Dev(Box::new(f))
    }

    pub fn dev_ap(f: impl Fn(&Devices, &[ApDev]) -> Result<()> + 'static) -> Self {
        TestFn::DevAp(Box::new(f))
    }

    pub fn dev_ap_params(
        f: impl Fn(&Devices, &[ApDev], &TestParams) -> Result<()> + 'static,
    ) -> Self {
        TestFn::DevApParams(Box::new(f))
    }

    pub fn arity(&self) -> usize {
        match self {
            TestFn::Dev(_) => 1,
            TestFn::DevAp(_) => 2,
            TestFn::DevApParams(_) => 3,
        }
    }
}

impl std::fmt::Debug for TestFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestFn(arity={})", self.arity())
    }
}

/// Call `func` with as many of the arguments as it takes.
pub fn var_arg_call(
    func: &TestFn,
    dev: &Devices,
    apdev: &[ApDev],
    params: &TestParams,
) -> Result<()> {
    match func {
        TestFn::Dev(f) => f(dev),
        TestFn::DevAp(f) => f(dev, apdev),
        TestFn::DevApParams(f) => f(dev, apdev, params),
    }
}

/// What a runner needs to select, list and report a test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestMeta {
    pub name: String,
    pub module: String,
    pub doc: Option<String>,
    pub long_duration: bool,
}

#[derive(Debug)]
pub struct TestCase {
    pub meta: TestMeta,
    pub func: TestFn,
}

impl TestCase {
    pub fn new(module: &str, name: &str, func: TestFn) -> Self {
        Self {
            meta: TestMeta {
                name: name.to_string(),
                module: module.to_string(),
                ..Default::default()
            },
            func,
        }
    }

    pub fn with_doc(mut self, doc: &str) -> Self {
        self.meta.doc = Some(doc.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn run(&self, dev: &Devices, apdev: &[ApDev], params: &TestParams) -> Result<()> {
        var_arg_call(&self.func, dev, apdev, params)
    }
}

/// Mark a test as slow so runners can leave it out of quick passes.
pub fn long_duration_test(mut case: TestCase) -> TestCase {
    case.meta.long_duration = true;
    case
}

/// Give `wrapper` the identity of the test it wraps, so selection by name
/// or module still finds it.
pub fn cloned_wrapper(wrapper: TestFn, meta: &TestMeta) -> TestCase {
    TestCase {
        meta: meta.clone(),
        func: wrapper,
    }
}

/// Run `case` with IPv6 disabled system-wide. Requires a VM.
pub fn disable_ipv6(case: TestCase) -> TestCase {
    disable_ipv6_with(case, Arc::new(CommandSysctl))
}

/// [`disable_ipv6`] writing through a caller-supplied [`Sysctl`].
pub fn disable_ipv6_with(case: TestCase, sysctl: Arc<dyn Sysctl>) -> TestCase {
    disable_ipv6_gated(case, sysctl, require_under_vm)
}

/// The VM check runs before any write, so a skip leaves sysctls untouched.
fn disable_ipv6_gated(
    case: TestCase,
    sysctl: Arc<dyn Sysctl>,
    vm_check: impl Fn() -> Result<()> + 'static,
) -> TestCase {
    let TestCase { meta, func } = case;
    let wrapper = TestFn::dev_ap_params(move |dev, apdev, params| {
        vm_check()?;
        let _ipv6 = Ipv6Disabled::new(sysctl.as_ref());
        var_arg_call(&func, dev, apdev, params)
    });
    cloned_wrapper(wrapper, &meta)
}
