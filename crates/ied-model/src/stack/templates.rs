//! ---
//! ied_section: "02-information-model"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Attribute templates per common data class for the loopback engine."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use crate::cdc::{control, option, Cdc, CreationArgs};
use crate::stack::BasicType::{self, *};
use crate::stack::FunctionalConstraint::{self, *};

/// One leaf attribute of a data object, named relative to the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub name: String,
    pub fc: FunctionalConstraint,
    pub kind: BasicType,
}

#[derive(Default)]
struct Leaves(Vec<Leaf>);

impl Leaves {
    fn add(&mut self, name: impl Into<String>, fc: FunctionalConstraint, kind: BasicType) {
        self.0.push(Leaf {
            name: name.into(),
            fc,
            kind,
        });
    }

    fn add_if(
        &mut self,
        present: bool,
        name: impl Into<String>,
        fc: FunctionalConstraint,
        kind: BasicType,
    ) {
        if present {
            self.add(name, fc, kind);
        }
    }

    fn status(&mut self, fc: FunctionalConstraint) {
        self.add("q", fc, Quality);
        self.add("t", fc, Timestamp);
    }

    fn analogue(&mut self, prefix: &str, fc: FunctionalConstraint, integer: bool) {
        if integer {
            self.add(format!("{prefix}.i"), fc, Int32);
        } else {
            self.add(format!("{prefix}.f"), fc, Float);
        }
    }

    fn vector(&mut self, prefix: &str, args: &CreationArgs) {
        self.add(format!("{prefix}.cVal.mag.f"), Mx, Float);
        self.add(format!("{prefix}.cVal.ang.f"), Mx, Float);
        self.add_if(
            args.has_option(option::INST_MAG),
            format!("{prefix}.instCVal.mag.f"),
            Mx,
            Float,
        );
        self.add(format!("{prefix}.q"), Mx, Quality);
        self.add(format!("{prefix}.t"), Mx, Timestamp);
    }

    fn phases(&mut self, args: &CreationArgs) {
        for (bit, name) in [
            (option::PHASE_A, "phsA"),
            (option::PHASE_B, "phsB"),
            (option::PHASE_C, "phsC"),
            (option::PHASE_NEUT, "neut"),
        ] {
            self.add_if(args.has_option(bit), name, St, Boolean);
        }
    }

    fn control(&mut self, ctl_val: BasicType, ctl_suffix: &str, args: &CreationArgs) {
        let model = args.control_model();
        self.add("ctlModel", Cf, Enum);
        if model == 0 {
            return;
        }
        self.add(format!("Oper.ctlVal{ctl_suffix}"), Co, ctl_val);
        self.add("Oper.ctlNum", Co, Uint32);
        self.add("Oper.T", Co, Timestamp);
        self.add("Oper.Test", Co, Boolean);
        match model {
            control::MODEL_SBO_NORMAL => self.add("SBO", Co, VisibleString),
            control::MODEL_SBO_ENHANCED => {
                self.add(format!("SBOw.ctlVal{ctl_suffix}"), Co, ctl_val);
                self.add("SBOw.Test", Co, Boolean);
            }
            _ => {}
        }
        self.add_if(
            args.has_control_option(control::HAS_CANCEL),
            format!("Cancel.ctlVal{ctl_suffix}"),
            Co,
            ctl_val,
        );
        self.add_if(args.has_control_option(control::ORIGIN), "origin.orCat", St, Enum);
        self.add_if(args.has_control_option(control::CTL_NUM), "ctlNum", St, Uint32);
        self.add_if(args.has_control_option(control::ST_SELD), "stSeld", St, Boolean);
        self.add_if(args.has_control_option(control::OP_RCVD), "opRcvd", Or, Boolean);
        self.add_if(args.has_control_option(control::OP_OK), "opOk", Or, Boolean);
        self.add_if(args.has_control_option(control::T_OP_OK), "tOpOk", Or, Timestamp);
        self.add_if(args.has_control_option(control::SBO_TIMEOUT), "sboTimeout", Cf, Uint32);
        self.add_if(args.has_control_option(control::SBO_CLASS), "sboClass", Cf, Enum);
        self.add_if(args.has_control_option(control::OPER_TIMEOUT), "operTimeout", Cf, Uint32);
    }

    fn common(&mut self, args: &CreationArgs) {
        self.add_if(args.has_option(option::BLK_ENA), "blkEna", Bl, Boolean);
        if args.has_option(option::PICS_SUBST) {
            self.add("subEna", Sv, Boolean);
            self.add("subQ", Sv, Quality);
            self.add("subID", Sv, VisibleString);
        }
        self.add_if(args.has_option(option::DESC), "d", Dc, VisibleString);
        self.add_if(args.has_option(option::DESC_UNICODE), "dU", Dc, VisibleString);
    }

    fn units(&mut self, args: &CreationArgs) {
        self.add_if(args.has_option(option::UNIT), "units.SIUnit", Cf, Enum);
        self.add_if(
            args.has_option(option::UNIT_MULTIPLIER),
            "units.multiplier",
            Cf,
            Enum,
        );
    }
}

/// Leaves an instance of `cdc` carries for the given creation arguments.
pub fn leaves(cdc: Cdc, args: &CreationArgs) -> Vec<Leaf> {
    let mut leaves = Leaves::default();
    let integer = args.integer();
    match cdc {
        Cdc::Sps => {
            leaves.add("stVal", St, Boolean);
            leaves.status(St);
        }
        Cdc::Dps => {
            leaves.add("stVal", St, Dbpos);
            leaves.status(St);
        }
        Cdc::Ins => {
            leaves.add("stVal", St, Int32);
            leaves.status(St);
        }
        Cdc::Ens => {
            leaves.add("stVal", St, Enum);
            leaves.status(St);
        }
        Cdc::Vss => {
            leaves.add("stVal", St, VisibleString);
            leaves.status(St);
        }
        Cdc::Act => {
            leaves.add("general", St, Boolean);
            leaves.phases(args);
            leaves.status(St);
        }
        Cdc::Acd => {
            leaves.add("general", St, Boolean);
            leaves.add("dirGeneral", St, Enum);
            leaves.phases(args);
            leaves.status(St);
        }
        Cdc::Sec => {
            leaves.add("cnt", St, Uint32);
            leaves.add("sev", St, Enum);
            leaves.add("t", St, Timestamp);
        }
        Cdc::Bcr => {
            leaves.add("actVal", St, Int64);
            leaves.status(St);
            if args.has_option(option::FROZEN_VALUE) {
                leaves.add("frVal", St, Int64);
                leaves.add("frTm", St, Timestamp);
            }
            leaves.add("pulsQty", Cf, Float);
        }
        Cdc::Hst => {
            let max_pts = match *args {
                CreationArgs::History { max_pts, .. } => max_pts,
                _ => 0,
            };
            let len = u16::try_from(max_pts).unwrap_or(u16::MAX);
            leaves.add("hstVal", St, Int32Array(len));
            leaves.status(St);
            leaves.add("numPts", Cf, Uint32);
            leaves.add("maxPts", Cf, Uint32);
        }
        Cdc::Mv => {
            leaves.analogue("mag", Mx, integer);
            leaves.add_if(args.has_option(option::INST_MAG), "instMag.f", Mx, Float);
            leaves.add_if(args.has_option(option::RANGE), "range", Mx, Enum);
            leaves.status(Mx);
            leaves.units(args);
        }
        Cdc::Sav => {
            leaves.analogue("instMag", Mx, integer);
            leaves.status(Mx);
            leaves.units(args);
            if args.has_option(option::MIN) {
                leaves.analogue("min", Cf, integer);
            }
            if args.has_option(option::MAX) {
                leaves.analogue("max", Cf, integer);
            }
        }
        Cdc::Cmv => {
            leaves.add("cVal.mag.f", Mx, Float);
            leaves.add("cVal.ang.f", Mx, Float);
            leaves.add_if(args.has_option(option::INST_MAG), "instCVal.mag.f", Mx, Float);
            leaves.add_if(args.has_option(option::RANGE), "range", Mx, Enum);
            leaves.add_if(args.has_option(option::RANGE_ANG), "rangeAng", Mx, Enum);
            leaves.status(Mx);
            leaves.units(args);
        }
        Cdc::Wye => {
            for phase in ["phsA", "phsB", "phsC"] {
                leaves.vector(phase, args);
            }
            if args.has_option(option::PHASE_NEUT) {
                leaves.vector("neut", args);
            }
            leaves.add_if(args.has_option(option::ANGLE_REF), "angRef", Cf, Enum);
        }
        Cdc::Del => {
            for phase in ["phsAB", "phsBC", "phsCA"] {
                leaves.vector(phase, args);
            }
            leaves.add_if(args.has_option(option::ANGLE_REF), "angRef", Cf, Enum);
        }
        Cdc::Spc => {
            leaves.add("stVal", St, Boolean);
            leaves.status(St);
            leaves.control(Boolean, "", args);
        }
        Cdc::Dpc => {
            leaves.add("stVal", St, Dbpos);
            leaves.status(St);
            leaves.control(Boolean, "", args);
        }
        Cdc::Inc => {
            leaves.add("stVal", St, Int32);
            leaves.status(St);
            leaves.control(Int32, "", args);
        }
        Cdc::Enc => {
            leaves.add("stVal", St, Enum);
            leaves.status(St);
            leaves.control(Enum, "", args);
        }
        Cdc::Bsc | Cdc::Isc => {
            leaves.add("valWTr.posVal", St, Int32);
            if let CreationArgs::Step {
                transient: true, ..
            } = args
            {
                leaves.add("valWTr.transInd", St, Boolean);
            }
            leaves.status(St);
            let ctl_val = if cdc == Cdc::Bsc { Enum } else { Int32 };
            leaves.control(ctl_val, "", args);
        }
        Cdc::Apc => {
            leaves.analogue("mxVal", Mx, integer);
            leaves.status(Mx);
            let (ctl_val, suffix) = if integer { (Int32, ".i") } else { (Float, ".f") };
            leaves.control(ctl_val, suffix, args);
            leaves.units(args);
        }
        Cdc::Bac => {
            leaves.analogue("mxVal", Mx, integer);
            leaves.status(Mx);
            leaves.control(Enum, "", args);
            leaves.add_if(args.has_option(option::STEP_SIZE), "stepSize", Cf, Float);
        }
        Cdc::Spg => leaves.add("setVal", Sp, Boolean),
        Cdc::Ing => {
            leaves.add("setVal", Sp, Int32);
            leaves.add_if(args.has_option(option::MIN), "minVal", Cf, Int32);
            leaves.add_if(args.has_option(option::MAX), "maxVal", Cf, Int32);
            leaves.add_if(args.has_option(option::STEP_SIZE), "stepSize", Cf, Uint32);
        }
        Cdc::Eng => leaves.add("setVal", Sp, Enum),
        Cdc::Vsg => leaves.add("setVal", Sp, VisibleString),
        Cdc::Asg => {
            leaves.analogue("setMag", Sp, integer);
            leaves.units(args);
            if args.has_option(option::MIN) {
                leaves.analogue("minVal", Cf, integer);
            }
            if args.has_option(option::MAX) {
                leaves.analogue("maxVal", Cf, integer);
            }
        }
        Cdc::Lpl => {
            leaves.add("vendor", Dc, VisibleString);
            leaves.add("swRev", Dc, VisibleString);
            leaves.add("configRev", Dc, VisibleString);
            leaves.add("ldNs", Ex, VisibleString);
        }
        Cdc::Dpl => {
            for name in ["vendor", "hwRev", "swRev", "serNum", "model"] {
                leaves.add(name, Dc, VisibleString);
            }
        }
        Cdc::Alm => {
            leaves.add("stVal", St, Boolean);
            leaves.status(St);
            if let CreationArgs::Alarm {
                old_status: true, ..
            } = args
            {
                leaves.add("oldStVal", St, Boolean);
            }
            leaves.add("ctlModel", Cf, Enum);
        }
        Cdc::Stv => {
            leaves.add("actSt", St, Enum);
            leaves.status(St);
            if let CreationArgs::Alarm {
                old_status: true, ..
            } = args
            {
                leaves.add("oldActSt", St, Enum);
            }
            leaves.add("ctlModel", Cf, Enum);
        }
        Cdc::Cmd => {
            leaves.add("stVal", St, Boolean);
            leaves.status(St);
            if let CreationArgs::Command {
                old_status,
                cm_tm,
                cm_ct,
                ..
            } = *args
            {
                leaves.add_if(old_status, "oldStVal", St, Boolean);
                leaves.add_if(cm_tm, "cmTm", St, Timestamp);
                leaves.add_if(cm_ct, "cmCt", St, Uint32);
            }
            leaves.add("ctlModel", Cf, Enum);
        }
        Cdc::Cte | Cdc::Tms => {
            let value = if cdc == Cdc::Cte { "actCtVal" } else { "actTmVal" };
            leaves.add(value, St, Int64);
            leaves.status(St);
            if let CreationArgs::Counter { his_rs: true, .. } = args {
                leaves.add("hisRs", St, Int64);
            }
            leaves.add("ctlModel", Cf, Enum);
        }
        Cdc::Spv => {
            leaves.add("stVal", St, Enum);
            leaves.status(St);
            if let CreationArgs::Supervision {
                cha_man_rs: true, ..
            } = args
            {
                leaves.add("chaManRs", St, Boolean);
            }
            leaves.add("ctlModel", Cf, Enum);
        }
    }
    leaves.common(args);
    leaves.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn find<'a>(leaves: &'a [Leaf], name: &str) -> Option<&'a Leaf> {
        leaves.iter().find(|leaf| leaf.name == name)
    }

    #[test]
    fn every_class_has_unique_leaf_names() {
        for cdc in Cdc::iter() {
            let args = CreationArgs::Basic { options: u32::MAX };
            let leaves = leaves(cdc, &args);
            assert!(!leaves.is_empty(), "{cdc} has no leaves");
            let mut names: Vec<_> = leaves.iter().map(|leaf| leaf.name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), leaves.len(), "{cdc} repeats a leaf name");
        }
    }

    #[test]
    fn analogue_values_follow_the_integer_flag() {
        let float = leaves(Cdc::Sav, &CreationArgs::Analogue { options: 0, integer: false });
        assert_eq!(find(&float, "instMag.f").map(|leaf| leaf.kind), Some(Float));
        assert!(find(&float, "instMag.i").is_none());

        let integer = leaves(Cdc::Sav, &CreationArgs::Analogue { options: 0, integer: true });
        assert_eq!(find(&integer, "instMag.i").map(|leaf| leaf.fc), Some(Mx));
    }

    #[test]
    fn control_blocks_exist_only_with_a_control_model() {
        let status_only = CreationArgs::Controllable { options: 0, control_options: 0 };
        assert!(find(&leaves(Cdc::Spc, &status_only), "Oper.ctlVal").is_none());

        let direct = CreationArgs::Controllable {
            options: 0,
            control_options: control::MODEL_DIRECT_NORMAL | control::HAS_CANCEL,
        };
        let spc = leaves(Cdc::Spc, &direct);
        assert_eq!(find(&spc, "Oper.ctlVal").map(|leaf| leaf.fc), Some(Co));
        assert!(find(&spc, "Cancel.ctlVal").is_some());
        assert!(find(&spc, "SBOw.ctlVal").is_none());
    }

    #[test]
    fn optional_leaves_are_gated_by_flags() {
        let plain = leaves(
            Cdc::Bsc,
            &CreationArgs::Step { options: 0, control_options: 0, transient: false },
        );
        assert!(find(&plain, "valWTr.transInd").is_none());
        let transient = leaves(
            Cdc::Bsc,
            &CreationArgs::Step { options: option::DESC, control_options: 0, transient: true },
        );
        assert!(find(&transient, "valWTr.transInd").is_some());
        assert!(find(&transient, "d").is_some());
    }
}
