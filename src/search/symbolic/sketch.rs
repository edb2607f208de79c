//! Symbolic program sketches for CEGIS
//!
//! A sketch is a straight-line program whose opcodes and operand indices are
//! integer variables. Encoding it yields one term that evaluates to whatever
//! program the slots describe, plus a predicate that holds exactly when the
//! slots describe a well-formed program.
//!
//! Each instruction reads up to three operands. An operand index below the
//! number of values computed so far selects that value (leaves first, then
//! earlier results). Any other index is a constant: `idx - s` for `idx >= s`,
//! `idx` itself when negative, and `idx >= s` when read as a bool.
//!
//! Intermediate values are let-bound, so the encoding stays linear in the
//! program size and solver queries see each value once.

use crate::ir::analysis::value_expr;
use crate::ir::{Binding, Expr, Type, Value};

/// Number of slots per instruction: opcode and three operand indices
pub const SLOTS_PER_INSTRUCTION: usize = 4;

/// Instruction set of the sketch. The discriminant is the opcode value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Copy = 0,
    Add = 1,
    Sub = 2,
    Mul = 3,
    Min = 4,
    Max = 5,
    Lt = 6,
    Le = 7,
    Eq = 8,
    Ne = 9,
    Div2 = 10,
    Mod2 = 11,
    Select = 12,
    And = 13,
    Or = 14,
    Not = 15,
}

impl Opcode {
    pub const ALL: [Opcode; 16] = [
        Opcode::Copy,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Min,
        Opcode::Max,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Div2,
        Opcode::Mod2,
        Opcode::Select,
        Opcode::And,
        Opcode::Or,
        Opcode::Not,
    ];

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Opcode> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// Number of operands read
    pub fn arity(self) -> usize {
        match self {
            Opcode::Copy | Opcode::Div2 | Opcode::Mod2 | Opcode::Not => 1,
            Opcode::Select => 3,
            _ => 2,
        }
    }

    /// Result type, or None for `Copy`, which forwards its operand's type
    pub fn result_type(self) -> Option<Type> {
        match self {
            Opcode::Copy => None,
            Opcode::Lt | Opcode::Le | Opcode::Eq | Opcode::Ne => Some(Type::Bool),
            Opcode::And | Opcode::Or | Opcode::Not => Some(Type::Bool),
            _ => Some(Type::Int),
        }
    }

    /// Operand types, or None for `Copy`, which accepts either
    pub fn operand_types(self) -> Option<&'static [Type]> {
        match self {
            Opcode::Copy => None,
            Opcode::Select => Some(&[Type::Bool, Type::Int, Type::Int]),
            Opcode::And | Opcode::Or => Some(&[Type::Bool, Type::Bool]),
            Opcode::Not => Some(&[Type::Bool]),
            Opcode::Div2 | Opcode::Mod2 => Some(&[Type::Int]),
            _ => Some(&[Type::Int, Type::Int]),
        }
    }
}

/// The slots of one sketch instruction
#[derive(Debug, Clone)]
pub struct SketchInstruction {
    pub opcode: Expr,
    pub args: [Expr; 3],
}

/// A sketch of `size` instructions over slots named `op0`, `op1`, ...
#[derive(Debug, Clone)]
pub struct ProgramSketch {
    pub instructions: Vec<SketchInstruction>,
}

impl ProgramSketch {
    /// Create a sketch with the given number of instructions
    pub fn new(size: usize) -> Self {
        let slot = |i: usize| Expr::var(format!("op{}", i));
        let instructions = (0..size)
            .map(|i| {
                let base = i * SLOTS_PER_INSTRUCTION;
                SketchInstruction {
                    opcode: slot(base),
                    args: [slot(base + 1), slot(base + 2), slot(base + 3)],
                }
            })
            .collect();
        Self { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Every slot, in program order
    pub fn slots(&self) -> Vec<Expr> {
        self.instructions
            .iter()
            .flat_map(|i| std::iter::once(i.opcode.clone()).chain(i.args.iter().cloned()))
            .collect()
    }

    pub fn slot_names(&self) -> Vec<String> {
        self.slots()
            .iter()
            .filter_map(|s| s.as_var().map(str::to_string))
            .collect()
    }

    /// The initial candidate: every slot zero
    pub fn zero_assignment(&self) -> Binding {
        self.slot_names()
            .into_iter()
            .map(|name| (name, Value::Int(0)))
            .collect()
    }
}

/// An encoded sketch. `value` and `well_formed` refer to the let-bound
/// names in `lets` and are only meaningful inside `bind`.
#[derive(Debug, Clone)]
pub struct EncodedProgram {
    pub lets: Vec<(String, Expr)>,
    pub value: Expr,
    pub well_formed: Expr,
}

impl EncodedProgram {
    /// Wrap `body` in the let chain defining the program's intermediates
    pub fn bind(&self, body: Expr) -> Expr {
        self.lets
            .iter()
            .rev()
            .fold(body, |acc, (name, value)| Expr::let_in(name.clone(), value.clone(), acc))
    }

    /// The program value as a self-contained term
    pub fn program(&self) -> Expr {
        self.bind(self.value.clone())
    }
}

/// A computed value with its two typed views and symbolic type flags
#[derive(Debug, Clone)]
struct Operand {
    int: Expr,
    boolean: Expr,
    may_be_int: Expr,
    may_be_bool: Expr,
}

impl Operand {
    fn leaf(term: &Expr) -> Self {
        match term.ty() {
            Type::Int => Operand {
                int: term.clone(),
                boolean: Expr::bool(false),
                may_be_int: Expr::bool(true),
                may_be_bool: Expr::bool(false),
            },
            Type::Bool => Operand {
                int: Expr::int(0),
                boolean: term.clone(),
                may_be_int: Expr::bool(false),
                may_be_bool: Expr::bool(true),
            },
        }
    }

    fn accepts(&self, ty: Type) -> Expr {
        match ty {
            Type::Int => self.may_be_int.clone(),
            Type::Bool => self.may_be_bool.clone(),
        }
    }
}

struct Encoder {
    lets: Vec<(String, Expr)>,
}

impl Encoder {
    /// Let-bind a non-trivial value and return a reference to it
    fn bind(&mut self, name: String, value: Expr) -> Expr {
        if value.is_leaf() {
            return value;
        }
        let reference = Expr::typed_var(name.clone(), value.ty());
        self.lets.push((name, value));
        reference
    }

    /// Read operand `idx` from the values computed so far
    fn fetch(&mut self, prefix: &str, idx: &Expr, values: &[Operand]) -> Operand {
        let s = Expr::int(values.len() as i64);
        let out_of_range = Expr::ge(idx.clone(), s.clone());
        let constant = Expr::select(out_of_range.clone(), Expr::sub(idx.clone(), s), idx.clone());
        let cascade = |base: Expr, view: fn(&Operand) -> &Expr| {
            values.iter().enumerate().fold(base, |acc, (j, v)| {
                Expr::select(Expr::eq(idx.clone(), Expr::int(j as i64)), view(v).clone(), acc)
            })
        };
        let int = cascade(constant, |v| &v.int);
        let boolean = cascade(out_of_range, |v| &v.boolean);
        let may_be_int = cascade(Expr::bool(true), |v| &v.may_be_int);
        let may_be_bool = cascade(Expr::bool(true), |v| &v.may_be_bool);
        Operand {
            int: self.bind(format!("{}_int", prefix), int),
            boolean: self.bind(format!("{}_bool", prefix), boolean),
            may_be_int: self.bind(format!("{}_is_int", prefix), may_be_int),
            may_be_bool: self.bind(format!("{}_is_bool", prefix), may_be_bool),
        }
    }
}

fn is_op(op: &Expr, opcode: Opcode) -> Expr {
    Expr::eq(op.clone(), Expr::int(opcode.code()))
}

fn is_any(op: &Expr, opcodes: &[Opcode]) -> Expr {
    Expr::or_all(opcodes.iter().map(|&o| is_op(op, o)))
}

fn one_if(cond: Expr) -> Expr {
    Expr::select(cond, Expr::int(1), Expr::int(0))
}

/// Build the symbolic program described by `opcodes` (grouped four per
/// instruction) over `leaves`.
///
/// `use_budget[j]` bounds how often leaf `j` may be read, and `max_leaves`
/// bounds the total number of leaf and constant operands read.
pub fn encode(
    leaves: &[Expr],
    use_budget: &[i64],
    opcodes: &[Expr],
    result_type: Type,
    max_leaves: usize,
) -> EncodedProgram {
    debug_assert_eq!(opcodes.len() % SLOTS_PER_INSTRUCTION, 0);
    debug_assert_eq!(leaves.len(), use_budget.len());

    let mut encoder = Encoder { lets: Vec::new() };
    let mut values: Vec<Operand> = leaves.iter().map(Operand::leaf).collect();
    let mut uses: Vec<Expr> = use_budget.iter().map(|&b| Expr::int(b)).collect();
    let mut leaves_used = Expr::int(0);
    let mut valid = Vec::new();
    let initial = Expr::int(leaves.len() as i64);

    for (i, slots) in opcodes.chunks(SLOTS_PER_INSTRUCTION).enumerate() {
        let op = &slots[0];
        let idx = &slots[1..];
        let s = Expr::int(values.len() as i64);
        let args: Vec<Operand> = idx
            .iter()
            .enumerate()
            .map(|(k, a)| encoder.fetch(&format!("_p{}_a{}", i, k + 1), a, &values))
            .collect();

        let used = [
            Expr::bool(true),
            Expr::not(is_any(op, &[Opcode::Copy, Opcode::Div2, Opcode::Mod2, Opcode::Not])),
            is_op(op, Opcode::Select),
        ];

        for (j, count) in uses.iter_mut().enumerate() {
            let j = Expr::int(j as i64);
            let reads = idx.iter().zip(&used).map(|(a, u)| {
                one_if(Expr::and(Expr::eq(a.clone(), j.clone()), u.clone()))
            });
            for read in reads {
                *count = Expr::sub(count.clone(), read);
            }
        }
        for (a, u) in idx.iter().zip(&used) {
            let is_leaf_or_const = Expr::or(
                Expr::lt(a.clone(), initial.clone()),
                Expr::ge(a.clone(), s.clone()),
            );
            leaves_used = Expr::add(leaves_used, one_if(Expr::and(is_leaf_or_const, u.clone())));
        }

        let (a1, a2, a3) = (&args[0], &args[1], &args[2]);
        let int_cases = [
            (Opcode::Copy, a1.int.clone()),
            (Opcode::Add, Expr::add(a1.int.clone(), a2.int.clone())),
            (Opcode::Sub, Expr::sub(a1.int.clone(), a2.int.clone())),
            (Opcode::Mul, Expr::mul(a1.int.clone(), a2.int.clone())),
            (Opcode::Min, Expr::min(a1.int.clone(), a2.int.clone())),
            (Opcode::Max, Expr::max(a1.int.clone(), a2.int.clone())),
            (Opcode::Div2, Expr::div(a1.int.clone(), Expr::int(2))),
            (Opcode::Mod2, Expr::modulo(a1.int.clone(), Expr::int(2))),
            (
                Opcode::Select,
                Expr::select(a1.boolean.clone(), a2.int.clone(), a3.int.clone()),
            ),
        ];
        let bool_cases = [
            (Opcode::Copy, a1.boolean.clone()),
            (Opcode::Lt, Expr::lt(a1.int.clone(), a2.int.clone())),
            (Opcode::Le, Expr::le(a1.int.clone(), a2.int.clone())),
            (Opcode::Eq, Expr::eq(a1.int.clone(), a2.int.clone())),
            (Opcode::Ne, Expr::ne(a1.int.clone(), a2.int.clone())),
            (Opcode::And, Expr::and(a1.boolean.clone(), a2.boolean.clone())),
            (Opcode::Or, Expr::or(a1.boolean.clone(), a2.boolean.clone())),
            (Opcode::Not, Expr::not(a1.boolean.clone())),
        ];
        let chain = |base: Expr, cases: &[(Opcode, Expr)]| {
            cases
                .iter()
                .fold(base, |acc, (o, v)| Expr::select(is_op(op, *o), v.clone(), acc))
        };
        let result_int = chain(Expr::int(0), &int_cases);
        let result_bool = chain(Expr::bool(false), &bool_cases);

        let produces = |ty: Type| {
            is_any(
                op,
                &Opcode::ALL
                    .into_iter()
                    .filter(|o| o.result_type() == Some(ty))
                    .collect::<Vec<_>>(),
            )
        };
        let may_be_int = Expr::select(
            is_op(op, Opcode::Copy),
            a1.may_be_int.clone(),
            produces(Type::Int),
        );
        let may_be_bool = Expr::select(
            is_op(op, Opcode::Copy),
            a1.may_be_bool.clone(),
            produces(Type::Bool),
        );

        // Operand types: each opcode constrains the operands it reads
        let well_typed = Opcode::ALL
            .iter()
            .rev()
            .fold(Expr::bool(false), |acc, &o| {
                let ok = match o.operand_types() {
                    None => Expr::bool(true),
                    Some(types) => Expr::and_all(
                        types.iter().zip(&args).map(|(ty, arg)| arg.accepts(*ty)),
                    ),
                };
                Expr::select(is_op(op, o), ok, acc)
            });

        valid.push(Expr::le(Expr::int(0), op.clone()));
        valid.push(Expr::lt(op.clone(), Expr::int(Opcode::ALL.len() as i64)));
        valid.push(well_typed);

        let prefix = format!("_p{}", i);
        let result = Operand {
            int: encoder.bind(format!("{}_int", prefix), result_int),
            boolean: encoder.bind(format!("{}_bool", prefix), result_bool),
            may_be_int: encoder.bind(format!("{}_is_int", prefix), may_be_int),
            may_be_bool: encoder.bind(format!("{}_is_bool", prefix), may_be_bool),
        };
        values.push(result);
    }

    for count in uses {
        valid.push(Expr::ge(count, Expr::int(0)));
    }
    valid.push(Expr::le(leaves_used, Expr::int(max_leaves as i64)));

    let (value, has_type) = match values.last() {
        Some(last) => match result_type {
            Type::Int => (last.int.clone(), last.may_be_int.clone()),
            Type::Bool => (last.boolean.clone(), last.may_be_bool.clone()),
        },
        None => (value_expr(Value::zero(result_type)), Expr::bool(false)),
    };
    valid.push(has_type);

    EncodedProgram {
        lets: encoder.lets,
        value,
        well_formed: Expr::and_all(valid),
    }
}

/// Render a concrete slot assignment as assembly-like text, for logging
pub fn describe_assignment(sketch: &ProgramSketch, assignment: &Binding) -> String {
    let read = |e: &Expr| {
        e.as_var()
            .and_then(|n| assignment.get(n))
            .and_then(Value::as_int)
            .unwrap_or(0)
    };
    sketch
        .instructions
        .iter()
        .map(|instr| {
            let code = read(&instr.opcode);
            let name = Opcode::from_code(code)
                .map(|o| format!("{:?}", o).to_lowercase())
                .unwrap_or_else(|| format!("op{}", code));
            let arity = Opcode::from_code(code).map(Opcode::arity).unwrap_or(3);
            let args: Vec<String> = instr.args[..arity].iter().map(|a| read(a).to_string()).collect();
            format!("{} {}", name, args.join(" "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}
