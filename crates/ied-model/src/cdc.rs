//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Common data class catalog: creation arguments, option tables, controllability."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::fmt;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::ConfigError;
use crate::schema::DataObjectSchema;
use crate::value::DataType;

/// Every common data class the catalog can instantiate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Cdc {
    Acd,
    Act,
    Alm,
    Apc,
    Asg,
    Bac,
    Bcr,
    Bsc,
    Cmd,
    Cmv,
    Cte,
    Del,
    Dpc,
    Dpl,
    Dps,
    Enc,
    Eng,
    Ens,
    Hst,
    Inc,
    Ing,
    Ins,
    Isc,
    Lpl,
    Mv,
    Sav,
    Sec,
    Spc,
    Spg,
    Sps,
    Spv,
    Stv,
    Tms,
    Vsg,
    Vss,
    Wye,
}

impl Cdc {
    /// Look up a class by its schema name.
    pub fn lookup(name: &str) -> Result<Self, ConfigError> {
        name.parse()
            .map_err(|_| ConfigError::UnknownCdc(name.to_owned()))
    }

    /// Whether field clients may operate instances of this class.
    pub fn controllable(self) -> bool {
        matches!(
            self,
            Cdc::Spc | Cdc::Dpc | Cdc::Inc | Cdc::Enc | Cdc::Bsc | Cdc::Isc | Cdc::Apc | Cdc::Bac
        )
    }

    /// Declared type of the commanded value for controllable classes.
    pub fn control_value_type(self, integer: bool) -> Option<DataType> {
        match self {
            Cdc::Spc | Cdc::Dpc => Some(DataType::Boolean),
            Cdc::Inc | Cdc::Enc | Cdc::Bsc | Cdc::Isc | Cdc::Bac => Some(DataType::Int32),
            Cdc::Apc if integer => Some(DataType::Int32),
            Cdc::Apc => Some(DataType::Float),
            _ => None,
        }
    }

    /// Build the typed creation arguments for `object`, applying defaults for
    /// anything the schema leaves out.
    pub fn creation_args(self, object: &DataObjectSchema) -> Result<CreationArgs, ConfigError> {
        let options = CDC_OPTIONS.reduce(&object.options)?;
        let control_options = || CONTROL_OPTIONS.reduce(&object.control_options);
        let integer = object.is_integer_not_float;
        let args = match self {
            Cdc::Dpc | Cdc::Enc | Cdc::Inc | Cdc::Spc => CreationArgs::Controllable {
                options,
                control_options: control_options()?,
            },
            Cdc::Asg | Cdc::Mv | Cdc::Sav => CreationArgs::Analogue { options, integer },
            Cdc::Apc | Cdc::Bac => CreationArgs::AnalogueControl {
                options,
                control_options: control_options()?,
                integer,
            },
            Cdc::Bsc | Cdc::Isc => CreationArgs::Step {
                options,
                control_options: control_options()?,
                transient: object.has_transient_indicator,
            },
            Cdc::Hst => CreationArgs::History {
                options,
                max_pts: object.max_pts,
            },
            Cdc::Alm | Cdc::Stv => CreationArgs::Alarm {
                options,
                control_options: control_options()?,
                wp_options: object.wp_options,
                old_status: object.has_old_status,
            },
            Cdc::Cmd => CreationArgs::Command {
                options,
                control_options: control_options()?,
                wp_options: object.wp_options,
                old_status: object.has_old_status,
                cm_tm: object.has_cm_tm,
                cm_ct: object.has_cm_ct,
            },
            Cdc::Cte | Cdc::Tms => CreationArgs::Counter {
                options,
                control_options: control_options()?,
                wp_options: object.wp_options,
                his_rs: object.has_his_rs,
            },
            Cdc::Spv => CreationArgs::Supervision {
                options,
                control_options: control_options()?,
                wp_options: object.wp_options,
                cha_man_rs: object.has_cha_man_rs,
            },
            Cdc::Acd
            | Cdc::Act
            | Cdc::Bcr
            | Cdc::Cmv
            | Cdc::Del
            | Cdc::Dpl
            | Cdc::Dps
            | Cdc::Eng
            | Cdc::Ens
            | Cdc::Ing
            | Cdc::Ins
            | Cdc::Lpl
            | Cdc::Sec
            | Cdc::Spg
            | Cdc::Sps
            | Cdc::Vsg
            | Cdc::Vss
            | Cdc::Wye => CreationArgs::Basic { options },
        };
        Ok(args)
    }
}

/// Constructor arguments beyond name and parent, grouped by signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationArgs {
    Basic {
        options: u32,
    },
    Controllable {
        options: u32,
        control_options: u32,
    },
    Analogue {
        options: u32,
        integer: bool,
    },
    AnalogueControl {
        options: u32,
        control_options: u32,
        integer: bool,
    },
    Step {
        options: u32,
        control_options: u32,
        transient: bool,
    },
    History {
        options: u32,
        max_pts: u32,
    },
    Alarm {
        options: u32,
        control_options: u32,
        wp_options: u32,
        old_status: bool,
    },
    Command {
        options: u32,
        control_options: u32,
        wp_options: u32,
        old_status: bool,
        cm_tm: bool,
        cm_ct: bool,
    },
    Counter {
        options: u32,
        control_options: u32,
        wp_options: u32,
        his_rs: bool,
    },
    Supervision {
        options: u32,
        control_options: u32,
        wp_options: u32,
        cha_man_rs: bool,
    },
}

impl CreationArgs {
    pub fn options(&self) -> u32 {
        match *self {
            CreationArgs::Basic { options }
            | CreationArgs::Controllable { options, .. }
            | CreationArgs::Analogue { options, .. }
            | CreationArgs::AnalogueControl { options, .. }
            | CreationArgs::Step { options, .. }
            | CreationArgs::History { options, .. }
            | CreationArgs::Alarm { options, .. }
            | CreationArgs::Command { options, .. }
            | CreationArgs::Counter { options, .. }
            | CreationArgs::Supervision { options, .. } => options,
        }
    }

    /// Control-option bitmask, zero for classes without a control model.
    pub fn control_options(&self) -> u32 {
        match *self {
            CreationArgs::Controllable { control_options, .. }
            | CreationArgs::AnalogueControl { control_options, .. }
            | CreationArgs::Step { control_options, .. }
            | CreationArgs::Alarm { control_options, .. }
            | CreationArgs::Command { control_options, .. }
            | CreationArgs::Counter { control_options, .. }
            | CreationArgs::Supervision { control_options, .. } => control_options,
            CreationArgs::Basic { .. }
            | CreationArgs::Analogue { .. }
            | CreationArgs::History { .. } => 0,
        }
    }

    pub fn integer(&self) -> bool {
        match *self {
            CreationArgs::Analogue { integer, .. }
            | CreationArgs::AnalogueControl { integer, .. } => integer,
            _ => false,
        }
    }

    pub fn has_option(&self, bit: u32) -> bool {
        self.options() & bit != 0
    }

    pub fn has_control_option(&self, bit: u32) -> bool {
        self.control_options() & bit != 0
    }

    /// Control model encoded in the low nibble of the control options.
    pub fn control_model(&self) -> u32 {
        self.control_options() & 0x0f
    }
}

/// Which option namespace a flag name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKind {
    Cdc,
    Control,
    Trigger,
    Report,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OptionKind::Cdc => "data object",
            OptionKind::Control => "control",
            OptionKind::Trigger => "trigger",
            OptionKind::Report => "report",
        };
        f.write_str(label)
    }
}

/// Name to bit lookup for one option namespace.
#[derive(Debug)]
pub struct FlagTable {
    kind: OptionKind,
    entries: &'static [(&'static str, u32)],
}

impl FlagTable {
    pub const fn new(kind: OptionKind, entries: &'static [(&'static str, u32)]) -> Self {
        Self { kind, entries }
    }

    pub fn kind(&self) -> OptionKind {
        self.kind
    }

    pub fn bit(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, bit)| *bit)
    }

    /// OR-reduce `names` into a bitmask. Unknown names fail the whole reduction.
    pub fn reduce<S: AsRef<str>>(&self, names: &[S]) -> Result<u32, ConfigError> {
        names.iter().try_fold(0, |mask, name| {
            let name = name.as_ref();
            self.bit(name)
                .map(|bit| mask | bit)
                .ok_or_else(|| ConfigError::UnknownOption {
                    kind: self.kind,
                    name: name.to_owned(),
                })
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|(name, _)| *name)
    }
}

pub mod option {
    pub const PICS_SUBST: u32 = 1 << 0;
    pub const BLK_ENA: u32 = 1 << 1;
    pub const DESC: u32 = 1 << 2;
    pub const DESC_UNICODE: u32 = 1 << 3;
    pub const AC_DLNDA: u32 = 1 << 4;
    pub const AC_DLN: u32 = 1 << 5;
    pub const UNIT: u32 = 1 << 6;
    pub const FROZEN_VALUE: u32 = 1 << 7;
    pub const ADDR: u32 = 1 << 8;
    pub const ADDINFO: u32 = 1 << 9;
    pub const INST_MAG: u32 = 1 << 10;
    pub const RANGE: u32 = 1 << 11;
    pub const UNIT_MULTIPLIER: u32 = 1 << 12;
    pub const AC_SCAV: u32 = 1 << 13;
    pub const MIN: u32 = 1 << 14;
    pub const MAX: u32 = 1 << 15;
    pub const AC_CLC_O: u32 = 1 << 16;
    pub const RANGE_ANG: u32 = 1 << 17;
    pub const PHASE_A: u32 = 1 << 18;
    pub const PHASE_B: u32 = 1 << 19;
    pub const PHASE_C: u32 = 1 << 20;
    pub const PHASE_NEUT: u32 = 1 << 21;
    pub const STEP_SIZE: u32 = 1 << 22;
    pub const ANGLE_REF: u32 = 1 << 23;
}

pub mod control {
    pub const MODEL_DIRECT_NORMAL: u32 = 1;
    pub const MODEL_SBO_NORMAL: u32 = 2;
    pub const MODEL_DIRECT_ENHANCED: u32 = 3;
    pub const MODEL_SBO_ENHANCED: u32 = 4;
    pub const HAS_CANCEL: u32 = 1 << 4;
    pub const IS_TIME_ACTIVATED: u32 = 1 << 5;
    pub const ORIGIN: u32 = 1 << 6;
    pub const CTL_NUM: u32 = 1 << 7;
    pub const ST_SELD: u32 = 1 << 8;
    pub const OP_RCVD: u32 = 1 << 9;
    pub const OP_OK: u32 = 1 << 10;
    pub const T_OP_OK: u32 = 1 << 11;
    pub const SBO_TIMEOUT: u32 = 1 << 12;
    pub const SBO_CLASS: u32 = 1 << 13;
    pub const OPER_TIMEOUT: u32 = 1 << 14;
}

pub mod trigger {
    pub const DATA_CHANGED: u32 = 1;
    pub const QUALITY_CHANGED: u32 = 2;
    pub const DATA_UPDATED: u32 = 4;
    pub const INTEGRITY: u32 = 8;
    pub const GENERAL_INTERROGATION: u32 = 16;
}

pub mod report {
    pub const SEQUENCE_NUMBER: u32 = 1;
    pub const TIME_STAMP: u32 = 2;
    pub const REASON_CODE: u32 = 4;
    pub const DATA_SET: u32 = 8;
    pub const DATA_REFERENCE: u32 = 16;
    pub const BUFFER_OVERFLOW: u32 = 32;
    pub const ENTRY_ID: u32 = 64;
    pub const CONFIGURATION_REVISION: u32 = 128;
}

pub static CDC_OPTIONS: FlagTable = FlagTable::new(
    OptionKind::Cdc,
    &[
        ("pics_subst", option::PICS_SUBST),
        ("blk_ena", option::BLK_ENA),
        ("desc", option::DESC),
        ("desc_unicode", option::DESC_UNICODE),
        ("ac_dlnda", option::AC_DLNDA),
        ("ac_dln", option::AC_DLN),
        ("unit", option::UNIT),
        ("frozen_value", option::FROZEN_VALUE),
        ("addr", option::ADDR),
        ("addinfo", option::ADDINFO),
        ("inst_mag", option::INST_MAG),
        ("range", option::RANGE),
        ("unit_multiplier", option::UNIT_MULTIPLIER),
        ("ac_scav", option::AC_SCAV),
        ("min", option::MIN),
        ("max", option::MAX),
        ("ac_clc_o", option::AC_CLC_O),
        ("range_ang", option::RANGE_ANG),
        ("phase_a", option::PHASE_A),
        ("phase_b", option::PHASE_B),
        ("phase_c", option::PHASE_C),
        ("phase_neut", option::PHASE_NEUT),
        ("step_size", option::STEP_SIZE),
        ("angle_ref", option::ANGLE_REF),
    ],
);

pub static CONTROL_OPTIONS: FlagTable = FlagTable::new(
    OptionKind::Control,
    &[
        ("direct_normal", control::MODEL_DIRECT_NORMAL),
        ("sbo_normal", control::MODEL_SBO_NORMAL),
        ("direct_enhanced", control::MODEL_DIRECT_ENHANCED),
        ("sbo_enhanced", control::MODEL_SBO_ENHANCED),
        ("has_cancel", control::HAS_CANCEL),
        ("is_time_activated", control::IS_TIME_ACTIVATED),
        ("origin", control::ORIGIN),
        ("ctl_num", control::CTL_NUM),
        ("st_seld", control::ST_SELD),
        ("op_rcvd", control::OP_RCVD),
        ("op_ok", control::OP_OK),
        ("t_op_ok", control::T_OP_OK),
        ("sbo_timeout", control::SBO_TIMEOUT),
        ("sbo_class", control::SBO_CLASS),
        ("oper_timeout", control::OPER_TIMEOUT),
    ],
);

pub static TRIGGER_OPTIONS: FlagTable = FlagTable::new(
    OptionKind::Trigger,
    &[
        ("data_changed", trigger::DATA_CHANGED),
        ("quality_changed", trigger::QUALITY_CHANGED),
        ("data_updated", trigger::DATA_UPDATED),
        ("integrity", trigger::INTEGRITY),
        ("general_interrogation", trigger::GENERAL_INTERROGATION),
    ],
);

pub static REPORT_OPTIONS: FlagTable = FlagTable::new(
    OptionKind::Report,
    &[
        ("sequence_number", report::SEQUENCE_NUMBER),
        ("time_stamp", report::TIME_STAMP),
        ("reason_code", report::REASON_CODE),
        ("data_set", report::DATA_SET),
        ("data_reference", report::DATA_REFERENCE),
        ("buffer_overflow", report::BUFFER_OVERFLOW),
        ("entry_id", report::ENTRY_ID),
        ("configuration_revision", report::CONFIGURATION_REVISION),
    ],
);
