//! Register and device name dictionaries
//!
//! Both dictionaries are plain values built once by the owner (usually
//! `PxarCore`) and handed out by reference. Lookups are case-insensitive;
//! all names are stored lower case.

use std::collections::BTreeMap;

use serde::Serialize;

/// Register ids and device codes
pub mod constants {
    // Register type codes
    pub const ROC_REG: u8 = 0x00;
    pub const TBM_REG: u8 = 0x0f;
    pub const DTB_REG: u8 = 0xff;

    // ROC DACs
    pub const ROC_DAC_VDIG: u8 = 0x01;
    pub const ROC_DAC_VANA: u8 = 0x02;
    pub const ROC_DAC_VSH: u8 = 0x03;
    pub const ROC_DAC_VCOMP: u8 = 0x04;
    pub const ROC_DAC_VLEAK_COMP: u8 = 0x05;
    pub const ROC_DAC_VRGPR: u8 = 0x06;
    pub const ROC_DAC_VWLLPR: u8 = 0x07;
    pub const ROC_DAC_VRGSH: u8 = 0x08;
    pub const ROC_DAC_VWLLSH: u8 = 0x09;
    pub const ROC_DAC_VHLDDEL: u8 = 0x0a;
    pub const ROC_DAC_VTRIM: u8 = 0x0b;
    pub const ROC_DAC_VTHRCOMP: u8 = 0x0c;
    pub const ROC_DAC_VIBIAS_BUS: u8 = 0x0d;
    pub const ROC_DAC_VBIAS_SF: u8 = 0x0e;
    pub const ROC_DAC_VOFFSETOP: u8 = 0x0f;
    pub const ROC_DAC_VIBIASOP: u8 = 0x10;
    pub const ROC_DAC_VOFFSETRO: u8 = 0x11;
    pub const ROC_DAC_VION: u8 = 0x12;
    pub const ROC_DAC_VIBIAS_PH: u8 = 0x13;
    pub const ROC_DAC_VIBIAS_DAC: u8 = 0x14;
    pub const ROC_DAC_VIBIAS_ROC: u8 = 0x15;
    pub const ROC_DAC_VICOLOR: u8 = 0x16;
    pub const ROC_DAC_VNPIX: u8 = 0x17;
    pub const ROC_DAC_VSUMCOL: u8 = 0x18;
    pub const ROC_DAC_VCAL: u8 = 0x19;
    pub const ROC_DAC_CALDEL: u8 = 0x1a;
    pub const ROC_DAC_CTRLREG: u8 = 0xfd;
    pub const ROC_DAC_WBC: u8 = 0xfe;
    pub const ROC_DAC_READBACK: u8 = 0xff;

    // TBM registers
    pub const TBM_REG_COUNTER_SWITCHES: u8 = 0x00;
    pub const TBM_REG_SET_MODE: u8 = 0x02;
    pub const TBM_REG_CLEAR_INJECT: u8 = 0x04;
    pub const TBM_REG_SET_PKAM_COUNTER: u8 = 0x08;
    pub const TBM_REG_SET_DELAYS: u8 = 0x0a;
    pub const TBM_REG_AUTORESET: u8 = 0x0c;
    pub const TBM_REG_CORES_A_B: u8 = 0x0e;
    pub const TBM_TOKENCHAIN_0: u8 = 0xf0;
    pub const TBM_TOKENCHAIN_1: u8 = 0xf1;

    // DTB signals
    pub const SIG_CLK: u8 = 0x00;
    pub const SIG_CTR: u8 = 0x01;
    pub const SIG_SDA: u8 = 0x02;
    pub const SIG_TIN: u8 = 0x03;
    pub const SIG_RDA_TOUT: u8 = 0x04;
    pub const SIG_ADC_TINDELAY: u8 = 0xf7;
    pub const SIG_ADC_TOUTDELAY: u8 = 0xf8;
    pub const SIG_ADC_TIMEOUT: u8 = 0xf9;
    pub const SIG_TRIGGER_TIMEOUT: u8 = 0xfa;
    pub const SIG_TRIGGER_LATENCY: u8 = 0xfb;
    pub const SIG_LEVEL: u8 = 0xfc;
    pub const SIG_LOOP_TRIGGER_DELAY: u8 = 0xfd;
    pub const SIG_DESER160PHASE: u8 = 0xfe;

    // ROC flavors
    pub const ROC_PSI46V2: u8 = 0x01;
    pub const ROC_PSI46XDB: u8 = 0x02;
    pub const ROC_PSI46DIG: u8 = 0x03;
    pub const ROC_PSI46DIG_TRIG: u8 = 0x04;
    pub const ROC_PSI46DIGV2_B: u8 = 0x05;
    pub const ROC_PSI46DIGV2: u8 = 0x06;
    pub const ROC_PSI46DIGV21: u8 = 0x07;
    pub const ROC_PSI46DIGV21RESPIN: u8 = 0x08;

    // TBM flavors
    pub const TBM_NONE: u8 = 0x20;
    pub const TBM_EMU: u8 = 0x21;
    pub const TBM_08: u8 = 0x22;
    pub const TBM_08A: u8 = 0x23;
    pub const TBM_08B: u8 = 0x24;
    pub const TBM_09: u8 = 0x25;
}

/// Which device a register belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterKind {
    Roc,
    Tbm,
    Dtb,
}

impl RegisterKind {
    /// Numeric type code as used on the wire
    pub fn code(self) -> u8 {
        match self {
            Self::Roc => constants::ROC_REG,
            Self::Tbm => constants::TBM_REG,
            Self::Dtb => constants::DTB_REG,
        }
    }
}

/// One dictionary entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Register {
    pub id: u8,
    /// Largest value the register accepts
    pub size: u8,
    pub kind: RegisterKind,
    /// False for alias names; the preferred name is used for reverse lookups
    pub preferred: bool,
}

/// Name lookup for ROC, TBM and DTB registers
#[derive(Debug, Clone)]
pub struct RegisterDictionary {
    registers: BTreeMap<String, Register>,
}

impl Default for RegisterDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterDictionary {
    pub fn new() -> Self {
        use constants::*;
        use RegisterKind::{Dtb, Roc, Tbm};

        let mut dict = Self {
            registers: BTreeMap::new(),
        };

        // DTB
        dict.insert("clk", SIG_CLK, 255, Dtb, true);
        dict.insert("ctr", SIG_CTR, 255, Dtb, true);
        dict.insert("sda", SIG_SDA, 255, Dtb, true);
        dict.insert("tin", SIG_TIN, 255, Dtb, true);
        dict.insert("tout", SIG_RDA_TOUT, 19, Dtb, true);
        dict.insert("rda", SIG_RDA_TOUT, 19, Dtb, true);
        dict.insert("level", SIG_LEVEL, 15, Dtb, true);
        dict.insert("triggerdelay", SIG_LOOP_TRIGGER_DELAY, 255, Dtb, true);
        dict.insert("deser160phase", SIG_DESER160PHASE, 7, Dtb, true);
        dict.insert("triggerlatency", SIG_TRIGGER_LATENCY, 255, Dtb, true);
        dict.insert("triggertimeout", SIG_TRIGGER_TIMEOUT, 255, Dtb, true);
        dict.insert("tindelay", SIG_ADC_TINDELAY, 63, Dtb, true);
        dict.insert("toutdelay", SIG_ADC_TOUTDELAY, 63, Dtb, true);
        dict.insert("adctimeout", SIG_ADC_TIMEOUT, 255, Dtb, true);

        // TBM
        dict.insert("base0", TBM_REG_COUNTER_SWITCHES, 255, Tbm, true);
        dict.insert("counters", TBM_REG_COUNTER_SWITCHES, 255, Tbm, false);
        dict.insert("base2", TBM_REG_SET_MODE, 255, Tbm, true);
        dict.insert("mode", TBM_REG_SET_MODE, 255, Tbm, false);
        dict.insert("base4", TBM_REG_CLEAR_INJECT, 255, Tbm, true);
        dict.insert("clear", TBM_REG_CLEAR_INJECT, 255, Tbm, false);
        dict.insert("inject", TBM_REG_CLEAR_INJECT, 255, Tbm, false);
        dict.insert("base8", TBM_REG_SET_PKAM_COUNTER, 255, Tbm, true);
        dict.insert("pkam_set", TBM_REG_SET_PKAM_COUNTER, 255, Tbm, false);
        dict.insert("basea", TBM_REG_SET_DELAYS, 255, Tbm, true);
        dict.insert("delays", TBM_REG_SET_DELAYS, 255, Tbm, false);
        dict.insert("basec", TBM_REG_AUTORESET, 255, Tbm, true);
        dict.insert("autoreset", TBM_REG_AUTORESET, 255, Tbm, false);
        // legacy name, kept so old configuration files still load
        dict.insert("temperature", TBM_REG_AUTORESET, 255, Tbm, false);
        dict.insert("basee", TBM_REG_CORES_A_B, 255, Tbm, true);
        dict.insert("cores", TBM_REG_CORES_A_B, 255, Tbm, false);
        dict.insert("nrocs", TBM_TOKENCHAIN_0, 8, Tbm, true);
        dict.insert("nrocs1", TBM_TOKENCHAIN_0, 8, Tbm, true);
        dict.insert("nrocs2", TBM_TOKENCHAIN_1, 8, Tbm, true);

        // ROC
        dict.insert("vdig", ROC_DAC_VDIG, 15, Roc, true);
        dict.insert("vdd", ROC_DAC_VDIG, 15, Roc, false);
        dict.insert("vana", ROC_DAC_VANA, 255, Roc, true);
        dict.insert("iana", ROC_DAC_VANA, 255, Roc, false);
        dict.insert("vsh", ROC_DAC_VSH, 255, Roc, true);
        dict.insert("vsf", ROC_DAC_VSH, 255, Roc, false);
        dict.insert("vcomp", ROC_DAC_VCOMP, 15, Roc, true);
        dict.insert("vwllpr", ROC_DAC_VWLLPR, 255, Roc, true);
        dict.insert("fbpre", ROC_DAC_VWLLPR, 255, Roc, false);
        dict.insert("vwllsh", ROC_DAC_VWLLSH, 255, Roc, true);
        dict.insert("fbsh", ROC_DAC_VWLLSH, 255, Roc, false);
        dict.insert("vhlddel", ROC_DAC_VHLDDEL, 255, Roc, true);
        dict.insert("holddel", ROC_DAC_VHLDDEL, 255, Roc, false);
        dict.insert("vtrim", ROC_DAC_VTRIM, 255, Roc, true);
        dict.insert("trimscale", ROC_DAC_VTRIM, 255, Roc, false);
        dict.insert("vthrcomp", ROC_DAC_VTHRCOMP, 255, Roc, true);
        dict.insert("globalthr", ROC_DAC_VTHRCOMP, 255, Roc, false);
        dict.insert("vibias_bus", ROC_DAC_VIBIAS_BUS, 255, Roc, true);
        dict.insert("vcolorbias", ROC_DAC_VIBIAS_BUS, 255, Roc, false);
        dict.insert("phoffset", ROC_DAC_VOFFSETRO, 255, Roc, true);
        dict.insert("voffsetro", ROC_DAC_VOFFSETRO, 255, Roc, false);
        dict.insert("voffsetr0", ROC_DAC_VOFFSETRO, 255, Roc, false);
        dict.insert("vcomp_adc", ROC_DAC_VIBIAS_PH, 255, Roc, true);
        dict.insert("vibias_ph", ROC_DAC_VIBIAS_PH, 255, Roc, false);
        dict.insert("adcpower", ROC_DAC_VIBIAS_PH, 255, Roc, false);
        dict.insert("phscale", ROC_DAC_VIBIAS_DAC, 255, Roc, true);
        dict.insert("viref_adc", ROC_DAC_VIBIAS_DAC, 255, Roc, false);
        dict.insert("vibias_dac", ROC_DAC_VIBIAS_DAC, 255, Roc, false);
        dict.insert("ibias_dac", ROC_DAC_VIBIAS_DAC, 255, Roc, false);
        dict.insert("vicolor", ROC_DAC_VICOLOR, 255, Roc, true);
        dict.insert("vcal", ROC_DAC_VCAL, 255, Roc, true);
        dict.insert("caldel", ROC_DAC_CALDEL, 255, Roc, true);
        dict.insert("ctrlreg", ROC_DAC_CTRLREG, 255, Roc, true);
        dict.insert("ccr", ROC_DAC_CTRLREG, 255, Roc, false);
        dict.insert("wbc", ROC_DAC_WBC, 255, Roc, true);
        dict.insert("readback", ROC_DAC_READBACK, 15, Roc, true);
        dict.insert("rbreg", ROC_DAC_READBACK, 15, Roc, false);
        dict.insert("vbias_sf", ROC_DAC_VBIAS_SF, 15, Roc, true);
        dict.insert("voffsetop", ROC_DAC_VOFFSETOP, 255, Roc, true);
        dict.insert("vion", ROC_DAC_VION, 255, Roc, true);
        dict.insert("vleak_comp", ROC_DAC_VLEAK_COMP, 255, Roc, true);
        dict.insert("vleak", ROC_DAC_VLEAK_COMP, 255, Roc, false);
        dict.insert("vrgpr", ROC_DAC_VRGPR, 255, Roc, true);
        dict.insert("vrgsh", ROC_DAC_VRGSH, 255, Roc, true);
        dict.insert("vibiasop", ROC_DAC_VIBIASOP, 255, Roc, true);
        dict.insert("vbias_op", ROC_DAC_VIBIASOP, 255, Roc, false);
        dict.insert("vibias_roc", ROC_DAC_VIBIAS_ROC, 255, Roc, true);
        dict.insert("vnpix", ROC_DAC_VNPIX, 255, Roc, true);
        dict.insert("vsumcol", ROC_DAC_VSUMCOL, 255, Roc, true);

        dict
    }

    fn insert(&mut self, name: &str, id: u8, size: u8, kind: RegisterKind, preferred: bool) {
        self.registers.insert(
            name.to_string(),
            Register {
                id,
                size,
                kind,
                preferred,
            },
        );
    }

    /// Look up a register of the given kind by name
    pub fn register(&self, name: &str, kind: RegisterKind) -> Option<&Register> {
        self.registers
            .get(&name.to_lowercase())
            .filter(|reg| reg.kind == kind)
    }

    /// Size of the register with the given id
    pub fn size(&self, id: u8, kind: RegisterKind) -> Option<u8> {
        self.registers
            .values()
            .find(|reg| reg.kind == kind && reg.id == id)
            .map(|reg| reg.size)
    }

    /// Preferred name of the register with the given id
    pub fn name_of(&self, id: u8, kind: RegisterKind) -> Option<&str> {
        self.registers
            .iter()
            .find(|(_, reg)| reg.kind == kind && reg.id == id && reg.preferred)
            .map(|(name, _)| name.as_str())
    }

    /// All preferred names of one kind, sorted
    pub fn names(&self, kind: RegisterKind) -> Vec<&str> {
        self.registers
            .iter()
            .filter(|(_, reg)| reg.kind == kind && reg.preferred)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Device name to device code lookup for ROC and TBM flavors
#[derive(Debug, Clone)]
pub struct DeviceDictionary {
    devices: BTreeMap<String, u8>,
}

impl Default for DeviceDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDictionary {
    pub fn new() -> Self {
        use constants::*;

        let devices = [
            ("psi46v2", ROC_PSI46V2),
            ("psi46xdb", ROC_PSI46XDB),
            ("psi46dig", ROC_PSI46DIG),
            ("psi46dig_trig", ROC_PSI46DIG_TRIG),
            ("psi46digv2_b", ROC_PSI46DIGV2_B),
            ("psi46digv2", ROC_PSI46DIGV2),
            ("psi46digv2.1", ROC_PSI46DIGV21),
            ("psi46digv21", ROC_PSI46DIGV21),
            ("psi46digv21respin", ROC_PSI46DIGV21RESPIN),
            ("notbm", TBM_NONE),
            ("tbmemulator", TBM_EMU),
            ("tbm08", TBM_08),
            ("tbm08a", TBM_08A),
            ("tbm08b", TBM_08B),
            ("tbm09", TBM_09),
        ]
        .into_iter()
        .map(|(name, code)| (name.to_string(), code))
        .collect();

        Self { devices }
    }

    /// Device code for a name, `None` if unknown
    pub fn code(&self, name: &str) -> Option<u8> {
        self.devices.get(&name.to_lowercase()).copied()
    }

    /// First name (alphabetically) registered for a device code
    pub fn name_of(&self, code: u8) -> Option<&str> {
        self.devices
            .iter()
            .find(|(_, c)| **c == code)
            .map(|(name, _)| name.as_str())
    }

    /// True for ROC flavors older than PSI46DIG
    pub fn is_analog_roc(&self, name: &str) -> bool {
        self.code(name)
            .is_some_and(|code| code > 0 && code < constants::ROC_PSI46DIG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_case_insensitive() {
        let dict = RegisterDictionary::new();
        let reg = dict.register("VCal", RegisterKind::Roc).unwrap();
        assert_eq!(reg.id, constants::ROC_DAC_VCAL);
        assert_eq!(reg.size, 255);
    }

    #[test]
    fn test_register_kind_must_match() {
        let dict = RegisterDictionary::new();
        assert!(dict.register("vcal", RegisterKind::Tbm).is_none());
        assert!(dict.register("base4", RegisterKind::Tbm).is_some());
        assert!(dict.register("vfoo", RegisterKind::Roc).is_none());
    }

    #[test]
    fn test_small_registers() {
        let dict = RegisterDictionary::new();
        assert_eq!(dict.size(constants::ROC_DAC_VDIG, RegisterKind::Roc), Some(15));
        assert_eq!(dict.size(constants::ROC_DAC_READBACK, RegisterKind::Roc), Some(15));
        assert_eq!(dict.size(constants::TBM_TOKENCHAIN_0, RegisterKind::Tbm), Some(8));
        assert_eq!(dict.size(0x42, RegisterKind::Roc), None);
    }

    #[test]
    fn test_alias_resolves_to_preferred_name() {
        let dict = RegisterDictionary::new();
        let alias = dict.register("voffsetro", RegisterKind::Roc).unwrap();
        assert!(!alias.preferred);
        assert_eq!(dict.name_of(alias.id, RegisterKind::Roc), Some("phoffset"));
        assert_eq!(
            dict.name_of(constants::ROC_DAC_VIBIAS_DAC, RegisterKind::Roc),
            Some("phscale")
        );
    }

    #[test]
    fn test_names_are_preferred_only() {
        let dict = RegisterDictionary::new();
        let names = dict.names(RegisterKind::Roc);
        assert!(names.contains(&"vsh"));
        assert!(!names.contains(&"vsf"));
        assert!(names.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_device_codes() {
        let dict = DeviceDictionary::new();
        assert_eq!(dict.code("PSI46digV2.1"), Some(0x07));
        assert_eq!(dict.code("psi46digv21"), Some(0x07));
        assert_eq!(dict.code("tbm08b"), Some(0x24));
        assert_eq!(dict.code("unknown"), None);
        assert_eq!(dict.name_of(0x20), Some("notbm"));
    }

    #[test]
    fn test_is_analog_roc() {
        let dict = DeviceDictionary::new();
        assert!(dict.is_analog_roc("psi46v2"));
        assert!(dict.is_analog_roc("psi46xdb"));
        assert!(!dict.is_analog_roc("psi46dig"));
        assert!(!dict.is_analog_roc("tbm08"));
        assert!(!dict.is_analog_roc("nothing"));
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(RegisterKind::Roc.code(), 0x00);
        assert_eq!(RegisterKind::Tbm.code(), 0x0f);
        assert_eq!(RegisterKind::Dtb.code(), 0xff);
    }
}
