//! Intermediate programs and operation profiles
//!
//! An intermediate program is the simplified instruction listing an external
//! extractor produces for a submission (LLVM textual IR, Python bytecode
//! disassembly, JVM bytecode). Each instruction is classified by its leading
//! opcode token into a fixed opcode class, and a program's operation profile
//! is the per-class count of those instructions.

pub mod extract;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category of an instruction, independent of the concrete IR dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpcodeClass {
    Arithmetic,
    Memory,
    Call,
    Control,
    Compare,
    Return,
    Other,
}

impl OpcodeClass {
    pub fn all() -> [OpcodeClass; 7] {
        [
            OpcodeClass::Arithmetic,
            OpcodeClass::Memory,
            OpcodeClass::Call,
            OpcodeClass::Control,
            OpcodeClass::Compare,
            OpcodeClass::Return,
            OpcodeClass::Other,
        ]
    }

    /// Classes whose presence or absence says something about the algorithm.
    pub fn critical() -> [OpcodeClass; 3] {
        [
            OpcodeClass::Arithmetic,
            OpcodeClass::Call,
            OpcodeClass::Compare,
        ]
    }

    pub fn is_critical(&self) -> bool {
        Self::critical().contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpcodeClass::Arithmetic => "arithmetic",
            OpcodeClass::Memory => "memory",
            OpcodeClass::Call => "call",
            OpcodeClass::Control => "control",
            OpcodeClass::Compare => "compare",
            OpcodeClass::Return => "return",
            OpcodeClass::Other => "other",
        }
    }

    /// Classify a leading opcode token. Unknown tokens map to `Other`.
    pub fn classify(opcode: &str) -> Self {
        let op = opcode.trim().to_ascii_lowercase();
        let op = op.as_str();

        // LLVM textual IR
        match op {
            "add" | "sub" | "mul" | "udiv" | "sdiv" | "urem" | "srem" | "fadd" | "fsub"
            | "fmul" | "fdiv" | "frem" | "fneg" | "shl" | "lshr" | "ashr" | "and" | "or"
            | "xor" => return OpcodeClass::Arithmetic,
            "alloca" | "load" | "store" | "getelementptr" | "memcpy" | "memset" | "fence"
            | "atomicrmw" | "cmpxchg" | "extractvalue" | "insertvalue" => {
                return OpcodeClass::Memory
            }
            "call" | "invoke" | "tail" | "musttail" => return OpcodeClass::Call,
            "br" | "switch" | "indirectbr" | "phi" | "select" | "unreachable" | "resume" => {
                return OpcodeClass::Control
            }
            "icmp" | "fcmp" => return OpcodeClass::Compare,
            "ret" => return OpcodeClass::Return,
            _ => {}
        }

        // Python bytecode (dis)
        if op.starts_with("binary_") || op.starts_with("inplace_") || op.starts_with("unary_")
        {
            return OpcodeClass::Arithmetic;
        }
        if op.starts_with("load_") || op.starts_with("store_") || op.starts_with("delete_") {
            return OpcodeClass::Memory;
        }
        if op.starts_with("call") || op == "precall" {
            return OpcodeClass::Call;
        }
        if op == "compare_op" || op == "contains_op" || op == "is_op" {
            return OpcodeClass::Compare;
        }
        if op.starts_with("return_") {
            return OpcodeClass::Return;
        }
        if op.contains("jump") || op == "for_iter" || op == "get_iter" {
            return OpcodeClass::Control;
        }

        // JVM bytecode
        if op.starts_with("if_") || op.starts_with("ifeq") || op.starts_with("ifne")
            || op == "goto" || op == "tableswitch" || op == "lookupswitch"
        {
            // if_icmp* both compares and branches; the compare is the interesting part
            return if op.starts_with("if_") {
                OpcodeClass::Compare
            } else {
                OpcodeClass::Control
            };
        }
        if op.starts_with("invoke") {
            return OpcodeClass::Call;
        }
        if op.ends_with("return") {
            return OpcodeClass::Return;
        }
        if matches!(op.get(1..), Some("add" | "sub" | "mul" | "div" | "rem" | "neg"))
            && matches!(op.chars().next(), Some('i' | 'l' | 'f' | 'd'))
        {
            return OpcodeClass::Arithmetic;
        }
        if matches!(op, "lcmp" | "fcmpl" | "fcmpg" | "dcmpl" | "dcmpg") {
            return OpcodeClass::Compare;
        }
        if op.contains("load") || op.contains("store") || op == "getfield" || op == "putfield"
        {
            return OpcodeClass::Memory;
        }

        OpcodeClass::Other
    }
}

impl fmt::Display for OpcodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single classified instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: String,
    pub class: OpcodeClass,
    pub text: String,
}

impl Instruction {
    /// Parse one IR line. Returns `None` for lines that carry no instruction
    /// (blank lines, comments, labels, function headers, metadata).
    pub fn parse(line: &str) -> Option<Self> {
        let text = line.trim();
        if text.is_empty() || is_structural_line(text) {
            return None;
        }

        let opcode = leading_opcode(text)?;
        Some(Instruction {
            class: OpcodeClass::classify(opcode),
            opcode: opcode.to_string(),
            text: text.to_string(),
        })
    }
}

fn is_structural_line(text: &str) -> bool {
    const SKIP_PREFIXES: &[&str] = &[
        ";", "#", "!", "}", "{", "define", "declare", "target", "source_filename",
        "attributes", "Disassembly of", "Code:", "public ", "private ", "static ",
    ];
    if SKIP_PREFIXES.iter().any(|p| text.starts_with(p)) {
        return true;
    }
    // Global definitions (`@x = ...`) and type declarations (`%struct.S = type ...`)
    if text.starts_with('@') || (text.starts_with('%') && text.contains(" = type ")) {
        return true;
    }
    // Block labels like `entry:` or `3:`
    text.ends_with(':') && !text.contains(' ')
}

/// Pick the opcode token out of an instruction line.
///
/// Handles `%r = op ...` (LLVM), `  12 LOAD_FAST 0 (a)` (Python `dis`, with an
/// optional line number and `>>` jump-target marker) and `3: iload_1` (javap).
fn leading_opcode(text: &str) -> Option<&str> {
    let rest = match text.split_once(" = ") {
        Some((lhs, rhs)) if lhs.starts_with('%') => rhs,
        _ => text,
    };

    rest.split_whitespace().find(|token| {
        let t = token.trim_end_matches(':');
        !t.is_empty() && t != ">>" && !t.chars().all(|c| c.is_ascii_digit())
    })
}

/// Ordered instruction listing for one program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateProgram {
    instructions: Vec<Instruction>,
}

impl IntermediateProgram {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Build a program from raw IR lines, skipping lines that are not instructions.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let instructions = lines
            .into_iter()
            .filter_map(|line| Instruction::parse(line.as_ref()))
            .collect();
        Self { instructions }
    }

    /// Empty program, used when extraction failed.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The first `max_lines` instruction lines, for prompts and audit trails.
    pub fn excerpt(&self, max_lines: usize) -> Vec<String> {
        self.instructions
            .iter()
            .take(max_lines)
            .map(|i| i.text.clone())
            .collect()
    }
}

/// Per-class instruction counts. Profiles are values: they are built once and
/// never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationProfile {
    counts: BTreeMap<OpcodeClass, u32>,
}

impl Default for OperationProfile {
    fn default() -> Self {
        Self {
            counts: OpcodeClass::all().into_iter().map(|c| (c, 0)).collect(),
        }
    }
}

impl OperationProfile {
    /// Build a profile from explicit counts; classes not listed count zero.
    pub fn from_counts(counts: impl IntoIterator<Item = (OpcodeClass, u32)>) -> Self {
        let mut profile = Self::default();
        for (class, count) in counts {
            *profile.counts.entry(class).or_insert(0) += count;
        }
        profile
    }

    pub fn count(&self, class: OpcodeClass) -> u32 {
        self.counts.get(&class).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &BTreeMap<OpcodeClass, u32> {
        &self.counts
    }

    /// Total instruction count over every class.
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// True when every class counts zero (e.g. extraction failed).
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Operation Profiler: count instructions per opcode class.
pub fn profile(program: &IntermediateProgram) -> OperationProfile {
    OperationProfile::from_counts(program.instructions().iter().map(|i| (i.class, 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD_LL: &str = r#"
; ModuleID = 'solution.c'
source_filename = "solution.c"

define dso_local i32 @solve(i32 noundef %0, i32 noundef %1) #0 {
entry:
  %2 = alloca i32, align 4
  %3 = alloca i32, align 4
  store i32 %0, ptr %2, align 4
  store i32 %1, ptr %3, align 4
  %4 = load i32, ptr %2, align 4
  %5 = load i32, ptr %3, align 4
  %6 = add nsw i32 %4, %5
  ret i32 %6
}

declare i32 @printf(ptr noundef, ...) #1
"#;

    #[test]
    fn test_profile_llvm_function() {
        let program = IntermediateProgram::from_lines(ADD_LL.lines());
        assert_eq!(program.len(), 8);

        let profile = profile(&program);
        assert_eq!(profile.count(OpcodeClass::Memory), 6);
        assert_eq!(profile.count(OpcodeClass::Arithmetic), 1);
        assert_eq!(profile.count(OpcodeClass::Return), 1);
        assert_eq!(profile.count(OpcodeClass::Call), 0);
        assert_eq!(profile.total(), 8);
    }

    #[test]
    fn test_profile_python_disassembly() {
        let dis = "\
  2           0 LOAD_FAST                0 (a)
              2 LOAD_FAST                1 (b)
              4 BINARY_ADD
              6 RETURN_VALUE
  3     >>    8 COMPARE_OP               2 (==)
             10 POP_JUMP_IF_FALSE       14
             12 CALL_FUNCTION            1";
        let profile = profile(&IntermediateProgram::from_lines(dis.lines()));
        assert_eq!(profile.count(OpcodeClass::Memory), 2);
        assert_eq!(profile.count(OpcodeClass::Arithmetic), 1);
        assert_eq!(profile.count(OpcodeClass::Return), 1);
        assert_eq!(profile.count(OpcodeClass::Compare), 1);
        assert_eq!(profile.count(OpcodeClass::Control), 1);
        assert_eq!(profile.count(OpcodeClass::Call), 1);
    }

    #[test]
    fn test_classify_jvm_opcodes() {
        assert_eq!(OpcodeClass::classify("iadd"), OpcodeClass::Arithmetic);
        assert_eq!(OpcodeClass::classify("iload_1"), OpcodeClass::Memory);
        assert_eq!(OpcodeClass::classify("invokevirtual"), OpcodeClass::Call);
        assert_eq!(OpcodeClass::classify("if_icmpne"), OpcodeClass::Compare);
        assert_eq!(OpcodeClass::classify("goto"), OpcodeClass::Control);
        assert_eq!(OpcodeClass::classify("ireturn"), OpcodeClass::Return);
    }

    #[test]
    fn test_unknown_opcode_is_other_and_not_critical() {
        let class = OpcodeClass::classify("frobnicate");
        assert_eq!(class, OpcodeClass::Other);
        assert!(!class.is_critical());
        assert!(OpcodeClass::Compare.is_critical());
    }

    #[test]
    fn test_empty_program_has_all_zero_profile() {
        let profile = profile(&IntermediateProgram::empty());
        assert!(profile.is_empty());
        assert_eq!(profile.counts().len(), OpcodeClass::all().len());
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let program = IntermediateProgram::from_lines(ADD_LL.lines());
        let excerpt = program.excerpt(3);
        assert_eq!(excerpt.len(), 3);
        assert!(excerpt[0].starts_with("%2 = alloca"));
    }
}
