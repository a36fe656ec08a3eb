//! The first user task.
//!
//! Forks three children. Each child reports its round and exits; the parent
//! reports, yields once so the child gets to run, and reports again.

#![no_std]
#![no_main]

use stdlib::println;
use stdlib::syscall::{Fork, sys_exit, sys_fork, sys_yield};

const CHILDREN: u8 = 3;

#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    println!("init: started");

    for round in 0..CHILDREN {
        match sys_fork() {
            Some(Fork::Child) => {
                println!("child: {round}");
                sys_exit(1);
            }
            Some(Fork::Parent(child)) => {
                let tag = char::from(b'a' + round);
                println!("parent: {tag} (child {child})");
                sys_yield();
                println!("parent: {tag}");
            }
            None => {
                println!("can't fork");
                sys_exit(-1);
            }
        }
    }

    sys_exit(0)
}
