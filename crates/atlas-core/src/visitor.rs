//! Visitor Dispatch over the Closed Node Set
//!
//! Kernel generators and diagnostic passes visit nodes through one method
//! per subkind. The set of visitable kinds is closed, so [`accept`] is a
//! single exhaustive match.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use crate::node::{Node, NodeKind};
use crate::runtime::Runtime;

/// One callback per node subkind. Every method defaults to doing nothing, so
/// implementors override only the kinds they care about.
#[allow(unused_variables, missing_docs)]
pub trait Visitor {
    fn visit_constant(&mut self, node: &Node) {}
    fn visit_index(&mut self, node: &Node) {}
    fn visit_read(&mut self, node: &Node) {}
    fn visit_write(&mut self, node: &Node) {}
    fn visit_unary(&mut self, node: &Node) {}
    fn visit_binary(&mut self, node: &Node) {}
    fn visit_neighbor(&mut self, node: &Node) {}
    fn visit_convolution(&mut self, node: &Node) {}
    fn visit_focal_func(&mut self, node: &Node) {}
    fn visit_focal_percent(&mut self, node: &Node) {}
    fn visit_focal_flow(&mut self, node: &Node) {}
    fn visit_zonal(&mut self, node: &Node) {}
    fn visit_summary(&mut self, node: &Node) {}
    fn visit_summary_item(&mut self, node: &Node) {}
    fn visit_radial(&mut self, node: &Node) {}
    fn visit_loop_cond(&mut self, node: &Node) {}
    fn visit_loop_head(&mut self, node: &Node) {}
    fn visit_loop_tail(&mut self, node: &Node) {}
    fn visit_switch(&mut self, node: &Node) {}
    fn visit_feedback(&mut self, node: &Node) {}
    fn visit_identity(&mut self, node: &Node) {}
}

/// Dispatches `node` to the matching visitor method.
pub fn accept(node: &Node, visitor: &mut dyn Visitor) {
    match &node.kind {
        NodeKind::Constant { .. } => visitor.visit_constant(node),
        NodeKind::Index { .. } => visitor.visit_index(node),
        NodeKind::Read { .. } => visitor.visit_read(node),
        NodeKind::Write { .. } => visitor.visit_write(node),
        NodeKind::Unary { .. } => visitor.visit_unary(node),
        NodeKind::Binary { .. } => visitor.visit_binary(node),
        NodeKind::Neighbor { .. } => visitor.visit_neighbor(node),
        NodeKind::Convolution { .. } => visitor.visit_convolution(node),
        NodeKind::FocalFunc { .. } => visitor.visit_focal_func(node),
        NodeKind::FocalPercent { .. } => visitor.visit_focal_percent(node),
        NodeKind::FocalFlow => visitor.visit_focal_flow(node),
        NodeKind::Zonal { .. } => visitor.visit_zonal(node),
        NodeKind::Summary { .. } => visitor.visit_summary(node),
        NodeKind::SummaryItem { .. } => visitor.visit_summary_item(node),
        NodeKind::Radial { .. } => visitor.visit_radial(node),
        NodeKind::LoopCond => visitor.visit_loop_cond(node),
        NodeKind::LoopHead => visitor.visit_loop_head(node),
        NodeKind::LoopTail => visitor.visit_loop_tail(node),
        NodeKind::Switch => visitor.visit_switch(node),
        NodeKind::Feedback { .. } => visitor.visit_feedback(node),
        NodeKind::Identity => visitor.visit_identity(node),
    }
}

/// Visits every node of `runtime` in creation order.
pub fn walk(runtime: &Runtime, visitor: &mut dyn Visitor) {
    for node in runtime.nodes() {
        accept(node, visitor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{DataType, MemOrder, MetaData, NumDim};
    use crate::node::UnaryOp;

    #[derive(Default)]
    struct Counter {
        reads: usize,
        unaries: usize,
    }

    impl Visitor for Counter {
        fn visit_read(&mut self, _node: &Node) {
            self.reads += 1;
        }
        fn visit_unary(&mut self, _node: &Node) {
            self.unaries += 1;
        }
    }

    #[test]
    fn test_walk_dispatches_by_kind() {
        let mut rt = Runtime::new();
        let meta = MetaData::new(
            NumDim::D2,
            vec![8, 8],
            DataType::F32,
            MemOrder::RowMajor,
            vec![4, 4],
        );
        let r = rt.read(meta, "dem");
        let n = rt.unary(UnaryOp::Neg, r);
        rt.write(n, "out");

        let mut counter = Counter::default();
        walk(&rt, &mut counter);
        assert_eq!(counter.reads, 1);
        assert_eq!(counter.unaries, 1);
    }
}
