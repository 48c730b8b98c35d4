use serde::{Deserialize, Serialize};

// =============================================================================
// OP - Bytecode instructions
// =============================================================================
//
// The operand stack holds 32-bit words. Addresses are byte offsets into VM
// RAM: the global frame starts at 0, call frames follow it. Stack effects are
// written in words, `( before -- after )`.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // literals
    PushInt(i32),
    PushFloat(f32),
    /// Handle of string constant `n`. ( -- h )
    PushStr(u32),
    /// ( -- 0 x n )
    PushZero(u32),
    /// ( x n -- )
    Pop(u32),

    // ==========================================================================
    // Memory
    // ==========================================================================
    /// Frame pointer plus offset. ( -- addr )
    LocalAddr(u32),
    /// ( -- addr )
    GlobalAddr(u32),
    /// ( addr -- addr+n )
    AddrOffset(u32),
    /// Bounds-checked element address. ( addr i -- addr+i*stride )
    IndexAddr { stride: u32, count: u32 },
    /// ( addr -- w x n )
    Load(u32),
    /// ( w x n addr -- )
    Store(u32),
    /// Writes one word per lane. ( w x lanes addr -- )
    StoreLanes(Vec<u8>),

    // integer arithmetic
    IAdd,
    ISub,
    IMul,
    IDiv,
    IMod,
    INeg,

    // integer comparison
    IEq,
    INe,
    ILt,
    IGt,
    ILe,
    IGe,

    // float arithmetic
    FAdd,
    FSub,
    FMul,
    FDiv,
    FNeg,

    // float comparison, result is an int
    FEq,
    FNe,
    FLt,
    FGt,
    FLe,
    FGe,

    // lane-wise float vectors of n words: ( a x n b x n -- c x n )
    VAdd(u32),
    VSub(u32),
    VMul(u32),
    VDiv(u32),
    VNeg(u32),

    // logic on ints, both operands always evaluated
    And,
    Or,
    Not,

    // conversions
    IToF,
    FToI,
    /// ( f -- f x n )
    Splat(u32),

    // ==========================================================================
    // Lanes
    // ==========================================================================
    /// ( v x width -- v' x lanes )
    Swizzle { width: u32, lanes: Vec<u8> },
    /// Keeps `len` words starting at `offset`. ( w x total -- w x len )
    Extract { total: u32, offset: u32, len: u32 },

    // ==========================================================================
    // Control flow
    // ==========================================================================
    /// Relative jump: the target is this op's index plus the offset.
    Jump(i32),
    /// ( c -- ) jumps when c is 0.
    JumpIfFalse(i32),
    /// Script function by index. Arguments move from the stack into the new
    /// frame; the return value is left on the stack.
    Call(u32),
    /// Native function by index into the assembly's native table.
    CallNative(u32),
    /// Leaves the top n words for the caller and pops the frame.
    Ret(u32),
    /// End of global code.
    Exit,

    // ==========================================================================
    // Host objects
    // ==========================================================================
    /// ( h -- w x words )
    ReadProp {
        accessor: u32,
        property: u32,
        words: u32,
    },
    /// ( w x words h -- )
    WriteProp {
        accessor: u32,
        property: u32,
        words: u32,
    },
}
