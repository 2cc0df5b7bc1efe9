/*! Character-class automata and a bytecode compiler for a thread-based
regular expression virtual machine.

This crate doesn't parse regular expressions, nor does it run them. It sits
between a parser and a VM, and it has two main parts:

* [`CharClass`]: a set of characters represented as a byte-level automaton in
  some [`Encoding`]. Classes support the usual set operations, can be saved to
  and loaded from disk, and are published to the VM as state transition
  tables.
* [`Compiler`]: takes an annotated regular expression tree ([`ReTree`]) whose
  leaves refer to published classes, and turns it into a program for the VM.

# Example

```rust
use jsre::{CharClass, Compiler, Encoding, MemoryVm, ReTree};

let mut vm = MemoryVm::new();

// Publish the class for the letters `a` to `z`.
let mut letters =
    CharClass::from_range(Encoding::Utf8, 'a' as u32, 'z' as u32);
let class = letters.publish(&mut vm).unwrap();

// Build the tree for `[a-z]{2,}` and compile it into the VM.
let mut tree = ReTree::new();
let leaf = tree.class(class);
let repeat = tree.repeat(leaf, 2, None);
let root = tree.group(vec![repeat]);
tree.set_root(root);

let compiled = Compiler::new().compile(&mut tree, &mut vm).unwrap();

assert_eq!(compiled.group_count, 1);
assert_eq!(vm.starts().len(), 1);
```
*/

pub use charclass::CaseFolding;
pub use charclass::CharClass;
pub use charclass::ClassRegistry;
pub use charclass::Code;
pub use charclass::Encoding;

pub use compiler::Compiled;
pub use compiler::Compiler;
pub use compiler::Program;
pub use compiler::ReTree;
pub use compiler::StartDescriptor;

pub use config::load_config_from_file;
pub use config::Config;
pub use config::VmLimits;

pub use vm::MemoryVm;
pub use vm::VmLoader;

pub mod charclass;
pub mod compiler;
pub mod config;
pub mod vm;
